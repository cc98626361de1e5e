//! Teardown tests for the threaded feeder.
//!
//! A feeder may be dropped at any point: before the first batch, while the
//! producer is reading, after the producer failed, or after an explicit
//! shutdown. None of these may hang or panic.

mod common;
use common::{float_dataset, init_logging, truncated_dataset};
use data_feeder::{MinibatchFeeder, PipelineState, SamplingPolicy};

use anyhow::Result;
use std::thread;
use std::time::Duration;

#[test]
fn test_construct_and_drop_repeatedly() -> Result<()> {
    init_logging();
    let fixture = float_dataset(64, 16)?;
    let config = fixture.config(32).threaded(true).seed(9).build();

    for _ in 0..200 {
        let feeder = MinibatchFeeder::open(&config)?;
        drop(feeder);
    }
    Ok(())
}

#[test]
fn test_drop_with_produced_minibatch_unconsumed() -> Result<()> {
    init_logging();
    let fixture = float_dataset(64, 16)?;
    let config = fixture.config(8).threaded(true).seed(11).build();

    // Staggered pauses let the first minibatch land in the slot before the drop.
    for i in 0..300u64 {
        let feeder = MinibatchFeeder::open(&config)?;
        thread::sleep(Duration::from_micros((i % 10) * 200));
        drop(feeder);
    }
    Ok(())
}

#[test]
fn test_drop_after_partial_consumption() -> Result<()> {
    let fixture = float_dataset(64, 16)?;
    let config = fixture.config(8).threaded(true).build();

    for consumed in 0..20 {
        let mut feeder = MinibatchFeeder::open(&config)?;
        for _ in 0..consumed {
            feeder.next_minibatch()?;
        }
    }
    Ok(())
}

#[test]
fn test_drop_while_producer_reads_large_batch() -> Result<()> {
    let fixture = float_dataset(2000, 64)?;
    let config = fixture
        .config(2000)
        .policy(SamplingPolicy::Sequential)
        .threaded(true)
        .build();

    for _ in 0..10 {
        let mut feeder = MinibatchFeeder::open(&config)?;
        // The producer starts on the next batch as soon as this one is handed back.
        feeder.next_minibatch()?;
    }
    Ok(())
}

#[test]
fn test_explicit_shutdown_is_idempotent() -> Result<()> {
    let fixture = float_dataset(16, 2)?;
    let mut feeder = MinibatchFeeder::open(&fixture.config(4).threaded(true).build())?;
    feeder.next_minibatch()?;

    feeder.shutdown()?;
    feeder.shutdown()?;
    assert_eq!(feeder.state(), PipelineState::Stopped);
    assert!(feeder.next_minibatch().is_err());
    Ok(())
}

#[test]
fn test_drop_after_producer_failure() -> Result<()> {
    let fixture = truncated_dataset(6, 4, 2)?;
    let config = fixture
        .config(2)
        .policy(SamplingPolicy::Sequential)
        .threaded(true)
        .build();

    for _ in 0..20 {
        let mut feeder = MinibatchFeeder::open(&config)?;
        feeder.next_minibatch()?;
        feeder.next_minibatch()?;
        assert!(feeder.next_minibatch().is_err());
        drop(feeder);
    }
    Ok(())
}
