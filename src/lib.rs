//! In-process actors: private state, sequential message processing, shared
//! worker pool.
//!
//! Each [`Actor`] owns a [`Handler`] and an unbounded mailbox. Senders never
//! block: `send` stages the message under a short lock and, if the actor is
//! idle, schedules exactly one drain burst on the [`Executor`]. The burst
//! processes messages one at a time until the mailbox is empty, so handler
//! code is single-threaded even though many actors drain in parallel.
//!
//! # Data flow
//!
//! ```text
//! sender ──send(m)──► staging list ──merge──► mailbox ──► handler
//!            │                                   ▲
//!            └── idle? schedule one burst ───────┘ (worker pool,
//!                                                   or inline in
//!                                                   same-thread mode)
//! ```
//!
//! # Delivery lanes
//!
//! | Lane | Entry point | Ordering |
//! |------|-------------|----------|
//! | Normal | [`Actor::send`], [`Actor::ask`] | FIFO per sender; first item the handler accepts |
//! | Priority | [`Actor::send_priority`], or any resident item the priority predicate accepts | Ahead of all normal items present at merge time, in arrival order |
//!
//! Handlers are *partial*: [`Handler::accepts`] decides applicability per
//! message, and items the handler rejects stay in the mailbox, in order,
//! until some later pass accepts them. A message nothing ever accepts
//! lingers indefinitely; covering every message you send is the caller's
//! responsibility.
//!
//! # Request/response
//!
//! [`Actor::ask`] wraps the message with a [`OneShot`] reply cell and hands
//! the cell back immediately; the handler answers through
//! [`Context::reply`], and [`Context::forward`] reroutes the *same* cell to
//! another actor so its reply resolves the original caller. Handlers never
//! see the envelope: matching and delivery are translated to the inner
//! message.
//!
//! # Example
//!
//! ```
//! use actor_runtime::{Actor, Context, Handler};
//!
//! struct Doubler;
//!
//! impl Handler for Doubler {
//!     type Msg = i32;
//!     type Reply = i32;
//!     type Error = String;
//!
//!     fn accepts(&self, _msg: &i32) -> bool {
//!         true
//!     }
//!
//!     fn handle(&mut self, msg: i32, ctx: &mut Context<'_, i32>) -> Result<(), String> {
//!         ctx.reply(msg * 2);
//!         Ok(())
//!     }
//! }
//!
//! let actor = Actor::new(Doubler);
//! assert_eq!(actor.ask_blocking(21), 42);
//! ```
//!
//! # Failure isolation
//!
//! A handler returning `Err` consults the failure pair
//! [`Handler::accepts_failure`] / [`Handler::handle_failure`]. A matched
//! failure is consumed and the burst moves to the next message. An unmatched
//! failure aborts the burst: the remaining messages stay in the mailbox, the
//! actor flips back to idle, and the error is logged at the worker boundary.
//! The next send re-activates the actor.

mod executor;
mod future;
mod mailbox;

pub use executor::{Executor, ExecutorParams, Job, PoolFactory, ThreadPool};
pub use future::OneShot;

use mailbox::Mailbox;
use parking_lot::Mutex;
use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Message-processing callback set for one actor.
///
/// Only [`accepts`](Handler::accepts) and [`handle`](Handler::handle) are
/// required. The priority and failure pairs default to "never matches", and
/// a handler that overrides [`accepts_priority`](Handler::accepts_priority)
/// must also override [`has_priority`](Handler::has_priority) to switch the
/// priority pass on.
///
/// The runtime guarantees `&mut self` access is serialized: at most one
/// burst per actor is ever in flight, so handler state needs no locking of
/// its own.
pub trait Handler: Send + 'static {
    /// Message type this actor consumes.
    type Msg: Send + 'static;
    /// Reply type produced via [`Context::reply`]. `Clone` so every waiter
    /// on a reply cell can observe the value.
    type Reply: Clone + Send + 'static;
    /// Failure type surfaced by fallible handling.
    type Error: fmt::Display + Send + 'static;

    /// Whether this handler applies to `msg`. Rejected messages stay in the
    /// mailbox for a later pass.
    fn accepts(&self, msg: &Self::Msg) -> bool;

    /// Consume one accepted message. Call [`Context::reply`] to answer a
    /// request; for fire-and-forget messages `reply` is a silent no-op.
    fn handle(&mut self, msg: Self::Msg, ctx: &mut Context<'_, Self::Reply>)
        -> Result<(), Self::Error>;

    /// Whether the priority pass should run at all. Override to `true` when
    /// overriding [`accepts_priority`](Handler::accepts_priority).
    fn has_priority(&self) -> bool {
        false
    }

    /// Whether `msg` should jump the queue. Checked against every resident
    /// item before any normal delivery.
    fn accepts_priority(&self, _msg: &Self::Msg) -> bool {
        false
    }

    /// Consume one priority-accepted message. Defaults to
    /// [`handle`](Handler::handle).
    fn handle_priority(
        &mut self,
        msg: Self::Msg,
        ctx: &mut Context<'_, Self::Reply>,
    ) -> Result<(), Self::Error> {
        self.handle(msg, ctx)
    }

    /// Whether this handler can absorb `err`. Unabsorbed failures abort the
    /// current burst.
    fn accepts_failure(&self, _err: &Self::Error) -> bool {
        false
    }

    /// Absorb a failure accepted by
    /// [`accepts_failure`](Handler::accepts_failure); the burst then
    /// continues with the next message.
    fn handle_failure(&mut self, _err: Self::Error) {}
}

/// Wraps every drain burst, composing outside-in (first wrapper outermost).
///
/// Each wrapper must call `next` exactly once. Use for thread-local scopes,
/// tracing spans, transactional brackets around a batch of messages.
pub trait BatchWrapper: Send + Sync + 'static {
    fn around(&self, next: &mut dyn FnMut());
}

fn run_wrapped(wrappers: &[Box<dyn BatchWrapper>], batch: &mut dyn FnMut()) {
    match wrappers.split_first() {
        Some((outer, rest)) => outer.around(&mut || run_wrapped(rest, &mut *batch)),
        None => batch(),
    }
}

/// Per-delivery view handed to the handler.
///
/// Carries the reply cell while a request is being handled and nothing
/// otherwise, so [`reply`](Context::reply) on a fire-and-forget message is
/// harmless.
pub struct Context<'a, R: Clone + Send + 'static> {
    reply_to: Option<&'a Arc<OneShot<R>>>,
}

impl<'a, R: Clone + Send + 'static> Context<'a, R> {
    /// Resolve the pending request, if any. First reply wins; later replies
    /// and replies outside a request are silently ignored.
    pub fn reply(&self, value: R) {
        if let Some(cell) = self.reply_to {
            cell.satisfy(value);
        }
    }

    /// Whether the message being handled is a request.
    pub fn replying(&self) -> bool {
        self.reply_to.is_some()
    }

    /// Reroute the pending request to `target`, whose reply will resolve the
    /// original caller's cell. Outside a request this is a plain
    /// [`send`](Actor::send).
    pub fn forward<T>(&self, msg: T::Msg, target: &Actor<T>)
    where
        T: Handler<Reply = R>,
    {
        match self.reply_to {
            Some(cell) => target.stage_normal(Envelope::Request(msg, Arc::clone(cell))),
            None => target.send(msg),
        }
    }
}

/// One mailbox entry: a bare message, or a message paired with its reply
/// cell. Handlers only ever see the inner message.
enum Envelope<M, R> {
    Plain(M),
    Request(M, Arc<OneShot<R>>),
}

impl<M, R> Envelope<M, R> {
    fn message(&self) -> &M {
        match self {
            Envelope::Plain(m) | Envelope::Request(m, _) => m,
        }
    }

    fn open(self) -> (M, Option<Arc<OneShot<R>>>) {
        match self {
            Envelope::Plain(m) => (m, None),
            Envelope::Request(m, cell) => (m, Some(cell)),
        }
    }
}

/// Sender-facing state, guarded by the actor's channel lock.
///
/// `scheduled` and `processing` form a two-stage interlock: `scheduled`
/// means a burst has been submitted to the pool but not yet started,
/// `processing` means one is running. Keeping them distinct is what makes a
/// send during the submitted-but-not-started window neither re-schedule nor
/// get lost.
struct ChannelState<M, R> {
    staging: Vec<Envelope<M, R>>,
    priority_staging: Vec<M>,
    processing: bool,
    scheduled: bool,
}

/// Drain-side state: only the thread running the current burst touches it.
struct DrainState<H: Handler> {
    handler: H,
    mailbox: Mailbox<Envelope<H::Msg, H::Reply>>,
}

struct Core<H: Handler> {
    channel: Mutex<ChannelState<H::Msg, H::Reply>>,
    burst: Mutex<DrainState<H>>,
    wrappers: Vec<Box<dyn BatchWrapper>>,
    executor: Arc<Executor>,
    /// Undelivered message count, for introspection only.
    depth: AtomicUsize,
}

/// What the enqueue path decided to do once the channel lock is released.
/// Submitting to the pool (or draining inline) under the lock would invite
/// deadlock with the executor and with user callbacks.
enum Activation {
    Inline,
    Submit,
    None,
}

/// Flips `processing` back off if a burst unwinds, so a panicking handler
/// leaves the actor idle instead of wedged.
struct ResetOnUnwind<'a, M, R> {
    channel: &'a Mutex<ChannelState<M, R>>,
}

impl<M, R> Drop for ResetOnUnwind<'_, M, R> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.channel.lock().processing = false;
        }
    }
}

/// Handle to one actor. Cloning is cheap and every clone addresses the same
/// mailbox; drop all clones to drop the actor.
pub struct Actor<H: Handler> {
    core: Arc<Core<H>>,
}

impl<H: Handler> Clone for Actor<H> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<H: Handler> fmt::Debug for Actor<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Actor")
            .field("pending", &self.pending())
            .field("draining", &self.is_draining())
            .finish_non_exhaustive()
    }
}

impl<H: Handler> Actor<H> {
    /// An actor on the process-wide default executor, with no wrappers.
    pub fn new(handler: H) -> Self {
        ActorBuilder::new(handler).build()
    }

    /// Fire and forget. Never blocks beyond the brief channel lock.
    pub fn send(&self, msg: H::Msg) {
        self.stage_normal(Envelope::Plain(msg));
    }

    /// Fire and forget, jumping ahead of every normal message present at
    /// the next merge. Priority messages among themselves keep arrival
    /// order. Rare by design: administrative front-of-queue traffic only.
    pub fn send_priority(&self, msg: H::Msg) {
        self.core.depth.fetch_add(1, Ordering::Relaxed);
        let activation = {
            let mut ch = self.core.channel.lock();
            ch.priority_staging.push(msg);
            self.plan_activation(&mut ch)
        };
        self.activate(activation);
    }

    /// Enqueue a request and return its reply cell immediately.
    pub fn ask(&self, msg: H::Msg) -> Arc<OneShot<H::Reply>> {
        let cell = Arc::new(OneShot::new());
        self.stage_normal(Envelope::Request(msg, Arc::clone(&cell)));
        cell
    }

    /// Enqueue a request and block until the handler replies.
    ///
    /// Blocks indefinitely if no handler ever replies. Calling this from
    /// inside this same actor's handler deadlocks: the burst that would
    /// produce the reply is the one you are blocking.
    pub fn ask_blocking(&self, msg: H::Msg) -> H::Reply {
        self.ask(msg).get()
    }

    /// Enqueue a request and wait up to `timeout` for the reply.
    ///
    /// `None` on timeout. The handler still runs eventually; its `reply`
    /// then settles a cell nobody is watching, which is harmless.
    pub fn ask_timeout(&self, msg: H::Msg, timeout: Duration) -> Option<H::Reply> {
        self.ask(msg).get_timeout(timeout)
    }

    /// Undelivered message count (staged + resident).
    pub fn pending(&self) -> usize {
        self.core.depth.load(Ordering::Relaxed)
    }

    /// Whether a drain burst is currently running.
    pub fn is_draining(&self) -> bool {
        self.core.channel.lock().processing
    }

    fn stage_normal(&self, envelope: Envelope<H::Msg, H::Reply>) {
        self.core.depth.fetch_add(1, Ordering::Relaxed);
        let activation = {
            let mut ch = self.core.channel.lock();
            ch.staging.push(envelope);
            self.plan_activation(&mut ch)
        };
        self.activate(activation);
    }

    /// Decide, under the channel lock, whether this send must activate the
    /// actor. At most one activation is in flight: `scheduled` covers the
    /// submitted-but-not-started window, `processing` the running burst.
    fn plan_activation(&self, ch: &mut ChannelState<H::Msg, H::Reply>) -> Activation {
        if ch.processing || ch.scheduled {
            return Activation::None;
        }
        if self.core.executor.same_thread() {
            ch.processing = true;
            Activation::Inline
        } else {
            ch.scheduled = true;
            Activation::Submit
        }
    }

    fn activate(&self, activation: Activation) {
        match activation {
            Activation::Inline => self.drain(true),
            Activation::Submit => {
                let actor = self.clone();
                self.core.executor.execute(Box::new(move || actor.drain(false)));
            }
            Activation::None => {}
        }
    }

    /// One drain burst. `inline` is set when the sending thread already
    /// claimed `processing` and is running the burst itself.
    fn drain(&self, inline: bool) {
        {
            let mut ch = self.core.channel.lock();
            if ch.processing && !inline {
                return;
            }
            ch.processing = true;
            ch.scheduled = false;
        }

        let mut burst = self.core.burst.lock();
        let _reset = ResetOnUnwind {
            channel: &self.core.channel,
        };

        let outcome = {
            let burst = &mut *burst;
            let mut result: Result<(), H::Error> = Ok(());
            {
                let mut batch = || result = self.run_batch(burst);
                run_wrapped(&self.core.wrappers, &mut batch);
            }
            result
        };

        if let Err(err) = outcome {
            // Unabsorbed failure: stop this burst, leave the rest of the
            // mailbox for the activation the next send will trigger.
            self.core.channel.lock().processing = false;
            log::error!("actor burst aborted by unhandled failure: {err}");
        }
    }

    fn run_batch(&self, burst: &mut DrainState<H>) -> Result<(), H::Error> {
        let DrainState { handler, mailbox } = burst;
        loop {
            self.merge_staged(mailbox);

            // Priority pass: exhaust everything the priority predicate
            // accepts, folding in new arrivals, before any normal delivery.
            if handler.has_priority() {
                loop {
                    match mailbox.take_first(|env| handler.accepts_priority(env.message())) {
                        Some(envelope) => {
                            self.core.depth.fetch_sub(1, Ordering::Relaxed);
                            Self::deliver(handler, envelope, true)?;
                        }
                        None => {
                            if !self.merge_staged(mailbox) {
                                break;
                            }
                        }
                    }
                }
            }

            match mailbox.take_first(|env| handler.accepts(env.message())) {
                Some(envelope) => {
                    self.core.depth.fetch_sub(1, Ordering::Relaxed);
                    Self::deliver(handler, envelope, false)?;
                }
                None => {
                    // Nothing resident applies. The idle flip must be
                    // atomic with the emptiness check, or a concurrent
                    // send could stage a message no activation will drain.
                    let mut ch = self.core.channel.lock();
                    if ch.staging.is_empty() && ch.priority_staging.is_empty() {
                        ch.processing = false;
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Move staged arrivals into the mailbox: the priority batch in front
    /// of everything resident (arrival order preserved), normal arrivals
    /// appended behind. Returns false if there was nothing to move.
    fn merge_staged(&self, mailbox: &mut Mailbox<Envelope<H::Msg, H::Reply>>) -> bool {
        let (priority, normal) = {
            let mut ch = self.core.channel.lock();
            if ch.staging.is_empty() && ch.priority_staging.is_empty() {
                return false;
            }
            (
                mem::take(&mut ch.priority_staging),
                mem::take(&mut ch.staging),
            )
        };
        for msg in priority.into_iter().rev() {
            mailbox.push_front(Envelope::Plain(msg));
        }
        for envelope in normal {
            mailbox.push_back(envelope);
        }
        true
    }

    fn deliver(
        handler: &mut H,
        envelope: Envelope<H::Msg, H::Reply>,
        priority: bool,
    ) -> Result<(), H::Error> {
        let (msg, reply_to) = envelope.open();
        let mut ctx = Context {
            reply_to: reply_to.as_ref(),
        };
        let result = if priority {
            handler.handle_priority(msg, &mut ctx)
        } else {
            handler.handle(msg, &mut ctx)
        };
        match result {
            Ok(()) => Ok(()),
            Err(err) if handler.accepts_failure(&err) => {
                handler.handle_failure(err);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

/// Wires a handler to its executor and batch wrappers.
///
/// ```
/// use actor_runtime::{Actor, ActorBuilder, Context, Executor, ExecutorParams, Handler};
/// use std::sync::Arc;
///
/// # struct Quiet;
/// # impl Handler for Quiet {
/// #     type Msg = ();
/// #     type Reply = ();
/// #     type Error = String;
/// #     fn accepts(&self, _: &()) -> bool { true }
/// #     fn handle(&mut self, _: (), _: &mut Context<'_, ()>) -> Result<(), String> { Ok(()) }
/// # }
/// let executor = Arc::new(Executor::with_params(ExecutorParams {
///     core_threads: 2,
///     max_threads: 8,
///     ..ExecutorParams::default()
/// }));
/// let actor = ActorBuilder::new(Quiet).executor(executor).build();
/// actor.send(());
/// ```
pub struct ActorBuilder<H: Handler> {
    handler: H,
    executor: Arc<Executor>,
    wrappers: Vec<Box<dyn BatchWrapper>>,
}

impl<H: Handler> ActorBuilder<H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            executor: Executor::global(),
            wrappers: Vec::new(),
        }
    }

    /// Drain on `executor` instead of the process-wide default.
    #[must_use]
    pub fn executor(mut self, executor: Arc<Executor>) -> Self {
        self.executor = executor;
        self
    }

    /// Add a batch wrapper. Wrappers run outside-in in the order added.
    #[must_use]
    pub fn wrapper(mut self, wrapper: Box<dyn BatchWrapper>) -> Self {
        self.wrappers.push(wrapper);
        self
    }

    pub fn build(self) -> Actor<H> {
        Actor {
            core: Arc::new(Core {
                channel: Mutex::new(ChannelState {
                    staging: Vec::new(),
                    priority_staging: Vec::new(),
                    processing: false,
                    scheduled: false,
                }),
                burst: Mutex::new(DrainState {
                    handler: self.handler,
                    mailbox: Mailbox::new(),
                }),
                wrappers: self.wrappers,
                executor: self.executor,
                depth: AtomicUsize::new(0),
            }),
        }
    }
}
