use actor_runtime::{ActorBuilder, Context, Executor, ExecutorParams, Handler};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::Arc;

struct Echo;

impl Handler for Echo {
    type Msg = u64;
    type Reply = u64;
    type Error = String;

    fn accepts(&self, _msg: &u64) -> bool {
        true
    }

    fn handle(&mut self, msg: u64, ctx: &mut Context<'_, u64>) -> Result<(), String> {
        ctx.reply(msg);
        Ok(())
    }
}

fn bench_ask_round_trip(c: &mut Criterion) {
    // Steady state: one actor reused across the whole measurement.
    let executor = Arc::new(Executor::with_params(ExecutorParams {
        core_threads: 2,
        max_threads: 8,
        ..ExecutorParams::default()
    }));
    let actor = ActorBuilder::new(Echo).executor(executor.clone()).build();

    c.bench_function("ask_round_trip", |b| {
        b.iter(|| black_box(actor.ask_blocking(black_box(7))));
    });

    executor.shutdown();
}

fn bench_inline_round_trip(c: &mut Criterion) {
    // Same-thread mode: the sending thread runs the burst itself, so this
    // measures pure dispatch cost with no pool hop.
    let executor = Arc::new(Executor::with_params(ExecutorParams {
        on_same_thread: true,
        ..ExecutorParams::default()
    }));
    let actor = ActorBuilder::new(Echo).executor(executor).build();

    c.bench_function("ask_round_trip_inline", |b| {
        b.iter(|| black_box(actor.ask_blocking(black_box(7))));
    });
}

criterion_group!(benches, bench_ask_round_trip, bench_inline_round_trip);
criterion_main!(benches);
