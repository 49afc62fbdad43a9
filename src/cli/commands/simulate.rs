use anyhow::{Context, Result};
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use tokio::time::MissedTickBehavior;

use super::context::{Services, STREAM};
use super::helpers::Target;
use crate::aws::KinesisService;
use crate::cli::{SimulateArgs, TargetArgs};
use crate::simulation::{parse_interval, Simulator};

pub async fn execute_simulate(args: SimulateArgs, target_args: &TargetArgs) -> Result<()> {
    let interval = parse_interval(args.interval)?;

    let publisher = if args.publish {
        let target = Target::resolve(target_args)?;
        eprintln!("==> Publishing to {} ({})", STREAM, target.describe());
        Some(Services::from_conf(&target.sdk_config().await, &target.endpoints).kinesis)
    } else {
        None
    };

    let mut rng = StdRng::from_entropy();
    let sent = run_simulation(
        &mut Simulator::new(),
        &mut rng,
        interval,
        args.count,
        publisher.as_ref(),
    )
    .await?;
    if publisher.is_some() {
        eprintln!("Published {} records", sent);
    }
    Ok(())
}

/// Tick every `interval`, printing each update and optionally putting it on
/// the stream. Returns the number of records published.
pub async fn run_simulation<R: Rng>(
    sim: &mut Simulator,
    rng: &mut R,
    interval: Duration,
    count: Option<u64>,
    publisher: Option<&KinesisService>,
) -> Result<u64> {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut published = 0;
    let mut ticks = 0;

    while count.map_or(true, |limit| ticks < limit) {
        ticker.tick().await;
        ticks += 1;

        let now = Utc::now();
        println!("Current time: {}", now.format("%Y-%m-%d %H:%M:%S"));
        for update in sim.tick(rng) {
            println!(
                "Segment: {}, Driver: {}, Speed: {:.2} mph",
                update.segment.name, update.segment.driver_id, update.speed_mph
            );
            if let Some(kinesis) = publisher {
                let record = update.to_segment_speed(now);
                let data = serde_json::to_vec(&record)?;
                kinesis
                    .put_record(STREAM, &record.id, data)
                    .await
                    .with_context(|| format!("failed to publish {}", record.id))?;
                published += 1;
            }
        }
        println!("---------------------------");
    }

    Ok(published)
}
