//! Request/response behavior: ask round trips, forwarding, timeouts,
//! reply uniqueness, and failure isolation.

use actor_runtime::{Actor, Context, Handler};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

fn wait_until(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

// ============================================================================
// Test Handlers
// ============================================================================

struct Doubler;

impl Handler for Doubler {
    type Msg = i32;
    type Reply = i32;
    type Error = String;

    fn accepts(&self, _msg: &i32) -> bool {
        true
    }

    fn handle(&mut self, msg: i32, ctx: &mut Context<'_, i32>) -> Result<(), String> {
        ctx.reply(msg * 2);
        Ok(())
    }
}

/// Always answers "ok", whatever the question.
struct Responder;

impl Handler for Responder {
    type Msg = String;
    type Reply = String;
    type Error = String;

    fn accepts(&self, _msg: &String) -> bool {
        true
    }

    fn handle(&mut self, _msg: String, ctx: &mut Context<'_, String>) -> Result<(), String> {
        ctx.reply("ok".to_string());
        Ok(())
    }
}

/// Relays every request downstream; the downstream reply resolves the
/// original caller.
struct Relay {
    downstream: Actor<Responder>,
}

impl Handler for Relay {
    type Msg = String;
    type Reply = String;
    type Error = String;

    fn accepts(&self, _msg: &String) -> bool {
        true
    }

    fn handle(&mut self, msg: String, ctx: &mut Context<'_, String>) -> Result<(), String> {
        ctx.forward(msg, &self.downstream);
        Ok(())
    }
}

/// Accepts everything, never replies.
struct Silent;

impl Handler for Silent {
    type Msg = String;
    type Reply = String;
    type Error = String;

    fn accepts(&self, _msg: &String) -> bool {
        true
    }

    fn handle(&mut self, _msg: String, _ctx: &mut Context<'_, String>) -> Result<(), String> {
        Ok(())
    }
}

/// Replies twice; only the first settle may win.
struct DoubleReplier;

impl Handler for DoubleReplier {
    type Msg = i32;
    type Reply = i32;
    type Error = String;

    fn accepts(&self, _msg: &i32) -> bool {
        true
    }

    fn handle(&mut self, msg: i32, ctx: &mut Context<'_, i32>) -> Result<(), String> {
        ctx.reply(msg);
        ctx.reply(msg * 10);
        Ok(())
    }
}

/// Fails on even numbers, replies to odd ones, and swallows its own
/// failures.
struct OddReplier {
    swallowed: Arc<Mutex<Vec<String>>>,
}

impl Handler for OddReplier {
    type Msg = i32;
    type Reply = i32;
    type Error = String;

    fn accepts(&self, _msg: &i32) -> bool {
        true
    }

    fn handle(&mut self, msg: i32, ctx: &mut Context<'_, i32>) -> Result<(), String> {
        if msg % 2 == 0 {
            return Err(format!("even message {msg}"));
        }
        ctx.reply(msg);
        Ok(())
    }

    fn accepts_failure(&self, err: &String) -> bool {
        err.starts_with("even")
    }

    fn handle_failure(&mut self, err: String) {
        self.swallowed.lock().unwrap().push(err);
    }
}

/// Takes its time, then replies anyway.
struct SlowReplier {
    delay: Duration,
}

impl Handler for SlowReplier {
    type Msg = i32;
    type Reply = i32;
    type Error = String;

    fn accepts(&self, _msg: &i32) -> bool {
        true
    }

    fn handle(&mut self, msg: i32, ctx: &mut Context<'_, i32>) -> Result<(), String> {
        thread::sleep(self.delay);
        ctx.reply(msg);
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn ask_blocking_doubles() {
    let actor = Actor::new(Doubler);
    assert_eq!(actor.ask_blocking(21), 42);
}

#[test]
fn ask_returns_cell_resolved_by_reply() {
    let actor = Actor::new(Doubler);
    let cell = actor.ask(5);
    assert_eq!(cell.get(), 10);
    // A second retrieval observes the same value.
    assert_eq!(cell.get(), 10);
}

#[test]
fn forward_routes_reply_to_original_caller() {
    let downstream = Actor::new(Responder);
    let relay = Actor::new(Relay {
        downstream: downstream.clone(),
    });

    assert_eq!(relay.ask_blocking("ping".to_string()), "ok");
    // Same observable result as asking the target directly.
    assert_eq!(downstream.ask_blocking("ping".to_string()), "ok");
}

#[test]
fn ask_timeout_returns_none_when_handler_never_replies() {
    let actor = Actor::new(Silent);
    let start = Instant::now();
    let reply = actor.ask_timeout("anyone there?".to_string(), Duration::from_millis(50));
    assert_eq!(reply, None);
    assert!(start.elapsed() >= Duration::from_millis(50));

    // The actor is still live afterwards.
    actor.send("fire and forget".to_string());
    assert!(wait_until(Duration::from_secs(2), || actor.pending() == 0));
}

#[test]
fn late_reply_after_timeout_is_harmless() {
    let actor = Actor::new(SlowReplier {
        delay: Duration::from_millis(100),
    });

    let cell = actor.ask(7);
    assert_eq!(cell.get_timeout(Duration::from_millis(20)), None);

    // The handler still runs and settles the cell nobody waited for.
    assert!(wait_until(Duration::from_secs(2), || cell.is_satisfied()));
    assert_eq!(cell.try_get(), Some(7));

    // And the actor keeps serving.
    assert_eq!(actor.ask_blocking(8), 8);
}

#[test]
fn first_reply_wins() {
    let actor = Actor::new(DoubleReplier);
    assert_eq!(actor.ask_blocking(3), 3);
}

#[test]
fn swallowed_failures_keep_the_burst_going() {
    let swallowed = Arc::new(Mutex::new(Vec::new()));
    let actor = Actor::new(OddReplier {
        swallowed: swallowed.clone(),
    });

    let cells: Vec<_> = (1..=10).map(|n| actor.ask(n)).collect();

    // Odd requests resolve to their own value.
    for n in [1, 3, 5, 7, 9] {
        let cell = &cells[(n - 1) as usize];
        assert_eq!(
            cell.get_timeout(Duration::from_secs(5)),
            Some(n),
            "odd request {n} should resolve"
        );
    }

    // Every even message was routed to the failure handler.
    assert!(wait_until(Duration::from_secs(2), || {
        swallowed.lock().unwrap().len() == 5
    }));

    // Even requests never got a reply.
    for n in [2, 4, 6, 8, 10] {
        assert!(
            !cells[(n - 1) as usize].is_satisfied(),
            "even request {n} must stay unresolved"
        );
    }

    // The actor stays usable after all those failures.
    assert_eq!(actor.ask_blocking(11), 11);
}
