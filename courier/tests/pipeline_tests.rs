/*
 * Copyright (c) 2024. Govcraft
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use courier::prelude::*;
use parking_lot::Mutex;

use crate::setup::messages::*;
use crate::setup::*;

mod setup;

async fn local_bus() -> anyhow::Result<Bus> {
    Ok(with_test_messages(Bus::builder()).launch().await?)
}

#[courier_test]
async fn test_subscribe_publish_unsubscribe() -> anyhow::Result<()> {
    initialize_tracing("pipeline_tests.log");
    let bus = local_bus().await?;
    let pings = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&pings);
    let subscription = bus.pipeline().subscribe_fn::<Ping, _>(move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })?;

    let outcome = bus.publish(Ping).await?;
    assert_eq!(outcome.delivered, 1);
    assert_eq!(pings.load(Ordering::SeqCst), 1);

    assert!(subscription.unsubscribe());
    assert!(!subscription.unsubscribe());

    let outcome = bus.publish(Ping).await?;
    assert_eq!(outcome.delivered, 0);
    assert!(!outcome.accepted());
    assert_eq!(pings.load(Ordering::SeqCst), 1);

    bus.shutdown().await;
    Ok(())
}

#[courier_test]
async fn test_failing_consumer_publishes_fault() -> anyhow::Result<()> {
    initialize_tracing("pipeline_tests.log");
    let bus = local_bus().await?;
    let prices = Arc::new(Mutex::new(Vec::new()));
    let faults = Arc::new(Mutex::new(Vec::new()));

    bus.pipeline().subscribe_fn::<PriceChanged, _>(|price, _| {
        anyhow::ensure!(price.price > 0, "price of {} must be positive", price.symbol);
        Ok(())
    })?;
    let seen = Arc::clone(&prices);
    bus.pipeline().subscribe_fn::<PriceChanged, _>(move |price, _| {
        seen.lock().push(price.price);
        Ok(())
    })?;
    let seen = Arc::clone(&faults);
    bus.pipeline()
        .subscribe_fn::<Fault<PriceChanged>, _>(move |fault, _| {
            seen.lock().push(fault.clone());
            Ok(())
        })?;

    let outcome = bus
        .publish(PriceChanged {
            symbol: "ACME".to_string(),
            price: 0,
        })
        .await?;

    assert_eq!(outcome.delivered, 1);
    assert_eq!(outcome.faulted, 1);
    assert_eq!(*prices.lock(), vec![0]);

    let faults = faults.lock();
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].failed_message.symbol, "ACME");
    assert_eq!(faults[0].reason(), Some("price of ACME must be positive"));

    bus.shutdown().await;
    Ok(())
}

#[courier_test]
async fn test_handlers_publish_follow_up_messages() -> anyhow::Result<()> {
    initialize_tracing("pipeline_tests.log");
    let bus = local_bus().await?;
    let pongs = Arc::new(AtomicUsize::new(0));

    bus.pipeline().subscribe_fn::<Ping, _>(|_, context| {
        context.publish(Pong);
        Ok(())
    })?;
    let counter = Arc::clone(&pongs);
    bus.pipeline().subscribe_fn::<Pong, _>(move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })?;

    bus.publish(Ping).await?;
    bus.publish(Ping).await?;
    assert_eq!(pongs.load(Ordering::SeqCst), 2);

    bus.shutdown().await;
    Ok(())
}

#[courier_test]
async fn test_correlated_subscribers_only_see_their_conversation() -> anyhow::Result<()> {
    initialize_tracing("pipeline_tests.log");
    let bus = local_bus().await?;
    let shipped = Arc::new(Mutex::new(Vec::new()));
    let everything = Arc::new(AtomicUsize::new(0));

    let seen = Arc::clone(&shipped);
    bus.pipeline()
        .subscribe_correlated_fn::<OrderShipped, _>(42, move |order, _| {
            seen.lock().push(order.order_id);
            Ok(())
        })?;
    let counter = Arc::clone(&everything);
    bus.pipeline()
        .subscribe_all_correlated_fn::<OrderShipped, _>(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })?;

    for order_id in [41, 42, 43] {
        bus.publish(OrderShipped {
            order_id,
            carrier: "post".to_string(),
        })
        .await?;
    }

    assert_eq!(*shipped.lock(), vec![42]);
    assert_eq!(everything.load(Ordering::SeqCst), 3);

    bus.shutdown().await;
    Ok(())
}

#[courier_test]
async fn test_publish_after_shutdown_is_rejected() -> anyhow::Result<()> {
    initialize_tracing("pipeline_tests.log");
    let bus = local_bus().await?;
    let hook_ran = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hook_ran);
    bus.on_stop(move || async move {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    bus.shutdown().await;
    bus.shutdown().await;

    assert!(bus.is_stopped());
    assert!(bus.pipeline().is_disposed());
    assert_eq!(hook_ran.load(Ordering::SeqCst), 1);
    assert!(matches!(bus.publish(Ping).await, Err(BusError::ShutDown(_))));
    assert!(bus.pipeline().subscribe_fn::<Ping, _>(|_, _| Ok(())).is_err());
    Ok(())
}
