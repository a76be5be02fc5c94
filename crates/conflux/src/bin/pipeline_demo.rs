//! # Pipeline Demo
//!
//! Producers append orders every frame, a consumer reads the consolidated
//! snapshot, and the squad cancels one lane's worth of orders along the way.
//! The cancelled orders are redirected, claimed for a couple of frames while
//! their side effects unwind, then reach CancelComplete on the squad and the
//! root.
//!
//! ```bash
//! # 30 frames, debug logging
//! RUST_LOG=debug cargo run -p conflux --bin pipeline_demo -- 30
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use conflux::{
    CancelBehaviour, CancellableDataStream, ConfluxResult, EntityKey, FrameLoop, InstanceId,
    OwnerId, OwnerIndex, PipelineConfig, RegistryKey, Tagged, TargetId,
};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_FRAMES: u64 = 20;
const ORDERS_PER_LANE: u32 = 4;
/// Frame on which the squad cancels the next frame's orders.
const CANCEL_FRAME: u64 = 5;
/// Frames the consumer keeps claiming a cancellation before letting go.
const UNWIND_FRAMES: u64 = 2;

type Order = Tagged<u32>;

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(env_filter)
        .init();
}

fn order_id(frame: u64, lane: usize, index: u32) -> InstanceId {
    let entity = (lane as u32) * ORDERS_PER_LANE + index;
    InstanceId::new(OwnerId(1), TargetId(0), EntityKey::new(entity, frame as u32))
}

/// Root owner with one squad; the squad's requests filter the order stream.
fn setup(
    frame_loop: &mut FrameLoop,
) -> ConfluxResult<(RegistryKey<CancellableDataStream<Order>>, OwnerIndex)> {
    let registry = frame_loop.registry_mut();
    let root = registry.owners_mut().add_root(OwnerId(0));
    let squad = registry.owners_mut().add_child(root, OwnerId(1))?;
    let behaviour = registry.config().default_cancel_behaviour;
    let orders = registry.register_cancellable_stream::<Order>("orders", squad, behaviour)?;
    Ok((orders, squad))
}

fn main() {
    init_tracing();

    let frames = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse::<u64>().ok())
        .unwrap_or(DEFAULT_FRAMES);

    let config = PipelineConfig {
        lane_count: 4,
        default_cancel_behaviour: CancelBehaviour::Explicit,
        ..PipelineConfig::default()
    };
    let lanes = config.lane_count;

    let mut frame_loop = match FrameLoop::from_config(config) {
        Ok(frame_loop) => frame_loop,
        Err(error) => {
            eprintln!("invalid configuration: {error}");
            std::process::exit(1);
        }
    };
    let (orders, squad) = match setup(&mut frame_loop) {
        Ok(handles) => handles,
        Err(error) => {
            eprintln!("setup failed: {error}");
            std::process::exit(1);
        }
    };

    let read_total = Arc::new(AtomicU64::new(0));
    let cancelled_frame = Arc::new(AtomicU64::new(0));

    for _ in 0..frames {
        let read_total = Arc::clone(&read_total);
        let cancelled_frame = Arc::clone(&cancelled_frame);

        let stats = frame_loop.run_frame(move |ctx| {
            let frame = ctx.frame();
            let pool = ctx.pool();
            let Some(stream) = ctx.registry().get_mut(&orders) else {
                return;
            };

            // Consume last frame's snapshot.
            let (fence, reader) = stream.acquire_reader();
            let read = pool.schedule(&fence, move || {
                let sum: u64 = reader.snapshot().iter().map(|o| u64::from(o.payload)).sum();
                read_total.fetch_add(sum, Ordering::Relaxed);
            });
            stream.release_reader(read);

            // Produce this frame's orders, one job per lane.
            let (fence, writer) = stream.acquire_writer();
            let written = pool.schedule_batch(&fence, lanes, move |lane| {
                let lane_writer = writer.lane(lane);
                for index in 0..ORDERS_PER_LANE {
                    lane_writer.write(Tagged::new(order_id(frame, lane, index), index + 1));
                }
            });
            stream.release_writer(written);

            let Some(pipeline) = ctx.registry().owners_mut().pipeline_mut(squad) else {
                return;
            };

            // Cancel lane 0's orders for next frame before they are produced.
            if frame == CANCEL_FRAME {
                let target = frame + 1;
                let (fence, cancel) = pipeline.requests_mut().acquire_writer();
                let requested = pool.schedule(&fence, move || {
                    let lane_cancel = cancel.lane(0);
                    for index in 0..ORDERS_PER_LANE {
                        lane_cancel.request_cancel(order_id(target, 0, index));
                    }
                });
                pipeline.requests_mut().release_writer(requested);
                cancelled_frame.store(target, Ordering::Relaxed);
            }

            // Keep the cancellation alive while its side effects unwind.
            let since = cancelled_frame.load(Ordering::Relaxed);
            if since != 0 && frame > since && frame <= since + UNWIND_FRAMES {
                let (fence, claimer) = pipeline.progress_mut().acquire_claimer();
                let claimed = pool.schedule(&fence, move || {
                    for index in 0..ORDERS_PER_LANE {
                        claimer.claim(order_id(since, 0, index));
                    }
                });
                pipeline.progress_mut().release_claimer(claimed);
            }
        });

        tracing::info!(
            frame = stats.frame,
            consolidated = stats.items_consolidated,
            cancelled = stats.cancellations_completed,
            elapsed_us = stats.elapsed.as_micros() as u64,
            "frame"
        );
    }

    let redirected = frame_loop
        .registry()
        .get(&orders)
        .map_or(0, |stream| stream.stats().redirected);
    let summary = frame_loop.stats().clone();

    println!("frames:                  {}", summary.frames_recorded);
    println!("avg frame:               {:.3} ms", summary.avg_frame_ms());
    println!("items consolidated:      {}", summary.items_consolidated);
    println!("orders redirected:       {redirected}");
    println!("cancellations completed: {}", summary.cancellations_completed);
    println!("payload read:            {}", read_total.load(Ordering::Relaxed));

    frame_loop.shutdown();
}
