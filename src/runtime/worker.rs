//! Web Worker subsystem
//!
//! Implements an HTML5-style worker model on top of Boa:
//! - new Worker(path) - spawn an OS thread running its own engine context
//! - worker.postMessage(value) / worker.terminate() on the handle
//! - postMessage(value), onMessage and the closing getter inside a worker
//! - JSON-copied payloads; no engine value ever crosses a thread boundary
//!
//! Workers form a tree rooted at the main thread. Each worker dequeues from
//! its own receive port and sends to its parent's port; the parent's handle
//! object and the child's sender reference form a reference cycle that the
//! collection rendezvous in [`try_collect_workers`] breaks once a subtree
//! has gone idle: quiescent children's handles are demoted from strong slot
//! entries to engine `WeakRef`s, a collection is forced so unreferenced
//! handles get finalised (releasing their receive ports), and survivors are
//! promoted back.

use boa_engine::{
    Context, JsData, JsNativeError, JsObject, JsResult, JsValue, NativeFunction, Source,
    js_string, object::ObjectInitializer, property::PropertyDescriptor,
};
use boa_gc::{Finalize, Trace};
use std::cell::RefCell;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{debug, trace, warn};

use super::port::{Message, Port, PortState};

/// Worker ids double as message receiver tags, so they are unique across
/// the whole process, not per parent.
static NEXT_WORKER_ID: AtomicU64 = AtomicU64::new(1);

// ============================================================================
// Worker record and per-thread state
// ============================================================================

/// Everything shared between a worker's thread, its parent's handle object
/// and the ports in between. The engine context itself is not here: contexts
/// are single-threaded and live on their owning thread's stack.
pub struct WorkerRecord {
    /// Unique id; messages posted by this worker to its parent carry it as
    /// the receiver tag.
    id: u64,
    /// Script the worker thread loads on startup.
    file: PathBuf,
    /// Port this worker dequeues from. Born with refcount 1, held by the
    /// parent's handle object until the handle is finalised.
    receive_port: Arc<Port>,
    /// The parent thread's receive port; this worker holds one sender
    /// reference to it for its whole lifetime.
    parent_port: Arc<Port>,
    /// Set once the handle finaliser has released the receive port, so a
    /// spurious second finalisation is a no-op.
    finalised: AtomicBool,
    thread: Mutex<Option<JoinHandle<()>>>,
}

/// One slot in a thread's workers array.
///
/// Outside the collection rendezvous every slot is `Strong`, pinning the
/// handle object against collection while its subtree may still have work.
enum WorkerSlot {
    Strong {
        object: JsObject,
        record: Arc<WorkerRecord>,
    },
    /// Mid-rendezvous form: the slot holds only a `WeakRef` wrapping the
    /// handle, so the handle is invisible to tracing but can be promoted
    /// back if user code still references it.
    Demoted {
        weak: JsObject,
        record: Arc<WorkerRecord>,
    },
}

impl WorkerSlot {
    fn record(&self) -> &Arc<WorkerRecord> {
        match self {
            WorkerSlot::Strong { record, .. } | WorkerSlot::Demoted { record, .. } => record,
        }
    }
}

/// Per-thread stash: the receive port, the record (absent on the main
/// thread) and the workers array. Engine contexts never cross threads, so
/// thread-local storage plays the role of the engine heap stash.
struct ThreadState {
    receive_port: Arc<Port>,
    record: Option<Arc<WorkerRecord>>,
    workers: Vec<WorkerSlot>,
}

thread_local! {
    static THREAD_STATE: RefCell<Option<ThreadState>> = RefCell::new(None);
}

/// Install this thread's worker state. Called once by `Runtime` on the main
/// thread and once at the top of every worker thread.
pub(crate) fn init_thread(receive_port: Arc<Port>, record: Option<Arc<WorkerRecord>>) {
    THREAD_STATE.with(|cell| {
        *cell.borrow_mut() = Some(ThreadState {
            receive_port,
            record,
            workers: Vec::new(),
        });
    });
}

/// Create and install the main thread's receive port: no parent, no senders
/// until a worker is spawned.
pub(crate) fn init_main_thread() -> Arc<Port> {
    let port = Port::new();
    init_thread(Arc::clone(&port), None);
    port
}

fn with_thread<R>(f: impl FnOnce(&mut ThreadState) -> R) -> R {
    THREAD_STATE.with(|cell| {
        let mut state = cell.borrow_mut();
        let state = state
            .as_mut()
            .expect("worker thread state not initialised");
        f(state)
    })
}

// ============================================================================
// Host object data and finaliser
// ============================================================================

/// Native data carried by a host `Worker` object. The record is reference
/// counted outside the engine heap, so it is hidden from tracing.
#[derive(Trace, JsData)]
struct WorkerHostData {
    #[unsafe_ignore_trace]
    record: Arc<WorkerRecord>,
}

impl Finalize for WorkerHostData {
    fn finalize(&self) {
        finalise_record(&self.record);
    }
}

/// Handle finaliser: disclaim the parent's sender reference on the child's
/// receive port. Once the refcount reaches zero the child thread, still
/// holding its own side, observes it and exits. Idempotent: the engine may
/// finalise spuriously, and explicit teardown also runs through here.
fn finalise_record(record: &Arc<WorkerRecord>) {
    if record.finalised.swap(true, Ordering::SeqCst) {
        return;
    }
    debug!(worker = record.id, "releasing worker receive port");
    record.receive_port.release();
}

// ============================================================================
// Registration
// ============================================================================

/// Register the `Worker` constructor and its prototype. Installed in every
/// context, so workers can spawn workers of their own.
pub(crate) fn register_worker_api(context: &mut Context) -> JsResult<()> {
    // Prototype with the handle methods, parked in a hidden global so the
    // native factory can reach it.
    let proto = ObjectInitializer::new(context)
        .function(
            NativeFunction::from_fn_ptr(worker_post_message),
            js_string!("postMessage"),
            1,
        )
        .function(
            NativeFunction::from_fn_ptr(worker_terminate),
            js_string!("terminate"),
            0,
        )
        .build();
    context
        .global_object()
        .set(js_string!("__Worker_prototype__"), proto, false, context)?;

    context.register_global_callable(
        js_string!("__krait_worker_spawn"),
        1,
        NativeFunction::from_fn_ptr(worker_spawn),
    )?;

    // Constructor shim plus the WeakRef helpers the collection rendezvous
    // uses to demote and promote handle references.
    let bootstrap = r#"
        globalThis.Worker = function Worker(file) {
            if (new.target === undefined) {
                throw new TypeError("Worker must be called as a constructor");
            }
            return __krait_worker_spawn.apply(undefined, arguments);
        };
        globalThis.Worker.prototype = globalThis.__Worker_prototype__;
        globalThis.__krait_weak_make = (target) => new WeakRef(target);
        globalThis.__krait_weak_deref = (weak) => weak.deref();
    "#;
    context.eval(Source::from_bytes(bootstrap.as_bytes()))?;

    Ok(())
}

/// Register the globals that only exist inside a worker: the global
/// `postMessage` back to the parent and the read-only `closing` flag.
pub(crate) fn register_worker_globals(context: &mut Context) -> JsResult<()> {
    context.register_global_callable(
        js_string!("postMessage"),
        1,
        NativeFunction::from_fn_ptr(global_post_message),
    )?;

    let getter = NativeFunction::from_fn_ptr(closing_getter);
    context.global_object().define_property_or_throw(
        js_string!("closing"),
        PropertyDescriptor::builder()
            .get(getter.to_js_function(context.realm()))
            .enumerable(false)
            .configurable(false)
            .build(),
        context,
    )?;

    Ok(())
}

// ============================================================================
// Native functions
// ============================================================================

/// Native factory behind the `Worker` constructor.
fn worker_spawn(_this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    if args.len() != 1 {
        return Err(JsNativeError::typ()
            .with_message("Worker expects exactly one argument")
            .into());
    }
    let file = match args[0].as_string() {
        Some(s) => PathBuf::from(s.to_std_string_escaped()),
        None => {
            return Err(JsNativeError::typ()
                .with_message("Worker expects a script path string")
                .into());
        }
    };

    let parent_port = with_thread(|state| Arc::clone(&state.receive_port));

    // The parent's handle holds the one initial sender reference on the
    // child's receive port; the child holds one on the parent's port.
    let receive_port = Port::with_refcount(1);
    parent_port.acquire();

    let record = Arc::new(WorkerRecord {
        id: NEXT_WORKER_ID.fetch_add(1, Ordering::SeqCst),
        file,
        receive_port,
        parent_port: Arc::clone(&parent_port),
        finalised: AtomicBool::new(false),
        thread: Mutex::new(None),
    });

    let entry = Arc::clone(&record);
    let spawned = thread::Builder::new()
        .name(format!("krait-worker-{}", record.id))
        .spawn(move || worker_thread(entry));

    match spawned {
        Ok(handle) => {
            *record.thread.lock().unwrap() = Some(handle);
        }
        Err(e) => {
            parent_port.release();
            record.finalised.store(true, Ordering::SeqCst);
            return Err(JsNativeError::error()
                .with_message(format!("failed to start worker thread: {}", e))
                .into());
        }
    }

    let proto = context
        .global_object()
        .get(js_string!("__Worker_prototype__"), context)?;
    let proto_obj = proto.as_object().map(|o| o.clone());
    let object = JsObject::from_proto_and_data(
        proto_obj,
        WorkerHostData {
            record: Arc::clone(&record),
        },
    );

    debug!(worker = record.id, file = %record.file.display(), "spawned worker");

    with_thread(|state| {
        state.workers.push(WorkerSlot::Strong {
            object: object.clone(),
            record,
        });
    });

    Ok(object.into())
}

/// Pull the worker record out of a handle's native data.
fn host_record(this: &JsValue) -> JsResult<Arc<WorkerRecord>> {
    let obj = this
        .as_object()
        .ok_or_else(|| JsNativeError::typ().with_message("this is not a Worker"))?;
    let data = obj
        .downcast_ref::<WorkerHostData>()
        .ok_or_else(|| JsNativeError::typ().with_message("this is not a Worker"))?;
    Ok(Arc::clone(&data.record))
}

/// Encode a `postMessage` argument through the engine's own JSON encoder,
/// so cyclic values raise the same TypeError script would get from
/// `JSON.stringify`.
fn encode_payload(args: &[JsValue], context: &mut Context) -> JsResult<String> {
    let value = args.first().cloned().unwrap_or_else(JsValue::undefined);
    let json = context
        .global_object()
        .get(js_string!("JSON"), context)?
        .as_object()
        .map(|o| o.clone())
        .ok_or_else(|| JsNativeError::typ().with_message("JSON is not available"))?;
    let stringify = json.get(js_string!("stringify"), context)?;
    let stringify = stringify
        .as_callable()
        .ok_or_else(|| JsNativeError::typ().with_message("JSON.stringify is not available"))?;
    let encoded = stringify.call(&json.clone().into(), &[value], context)?;
    match encoded.as_string() {
        Some(s) => Ok(s.to_std_string_escaped()),
        // Values with no JSON form (undefined, bare functions) travel as
        // null rather than failing the send.
        None => Ok("null".to_string()),
    }
}

/// `Worker.prototype.postMessage` - deliver into the target worker's
/// receive port, addressed at its global `onMessage`.
fn worker_post_message(
    this: &JsValue,
    args: &[JsValue],
    context: &mut Context,
) -> JsResult<JsValue> {
    let record = host_record(this)?;
    let contents = encode_payload(args, context)?;
    if !record.receive_port.send(Message::global(contents)) {
        trace!(worker = record.id, "message dropped, worker is down");
    }
    Ok(JsValue::undefined())
}

/// `Worker.prototype.terminate` - cooperative stop. The flag is observed by
/// the worker before each dispatch and on wakeup, and exposed to its script
/// as `closing`; running script is never aborted.
fn worker_terminate(this: &JsValue, _args: &[JsValue], _context: &mut Context) -> JsResult<JsValue> {
    let record = host_record(this)?;
    record.receive_port.terminate();
    Ok(JsValue::undefined())
}

/// Worker-global `postMessage` - deliver into the parent's receive port,
/// addressed at the handle object that represents this worker there.
fn global_post_message(
    _this: &JsValue,
    args: &[JsValue],
    context: &mut Context,
) -> JsResult<JsValue> {
    let record = with_thread(|state| state.record.clone()).ok_or_else(|| {
        JsNativeError::typ().with_message("postMessage is only available inside a worker")
    })?;
    let contents = encode_payload(args, context)?;
    if !record.parent_port.send(Message::targeted(contents, record.id)) {
        trace!(worker = record.id, "message dropped, parent is down");
    }
    Ok(JsValue::undefined())
}

/// Getter for the worker-global `closing` flag.
fn closing_getter(_this: &JsValue, _args: &[JsValue], _context: &mut Context) -> JsResult<JsValue> {
    let port = with_thread(|state| Arc::clone(&state.receive_port));
    Ok(JsValue::from(port.is_terminated()))
}

// ============================================================================
// WeakRef helpers
// ============================================================================

fn make_weak(target: &JsObject, context: &mut Context) -> JsResult<JsObject> {
    let helper = context
        .global_object()
        .get(js_string!("__krait_weak_make"), context)?;
    let helper = helper
        .as_callable()
        .ok_or_else(|| JsNativeError::typ().with_message("weak helper missing"))?;
    let weak = helper.call(&JsValue::undefined(), &[target.clone().into()], context)?;
    weak.as_object()
        .map(|o| o.clone())
        .ok_or_else(|| {
            JsNativeError::typ()
                .with_message("WeakRef construction failed")
                .into()
        })
}

fn deref_weak(weak: &JsObject, context: &mut Context) -> JsResult<Option<JsObject>> {
    let helper = context
        .global_object()
        .get(js_string!("__krait_weak_deref"), context)?;
    let helper = helper
        .as_callable()
        .ok_or_else(|| JsNativeError::typ().with_message("weak helper missing"))?;
    let target = helper.call(&JsValue::undefined(), &[weak.clone().into()], context)?;
    Ok(target.as_object().map(|o| o.clone()))
}

// ============================================================================
// Collection rendezvous
// ============================================================================

/// Try to reclaim idle child workers. Returns true iff every child subtree
/// was quiescent, i.e. the subtree rooted at this thread has no work left.
///
/// The caller must hold this thread's receive-port lock (and, on the
/// blocking receive path, the parent's before it); `state` is the held
/// guard's view. Holding the lock for the whole scan closes the race where
/// a child sends us a message and goes to sleep just as we decide it is
/// idle: the send serialises behind the lock we hold.
fn try_collect_workers(state: &PortState, context: &mut Context) -> bool {
    if !state.is_empty() {
        return false;
    }
    let slots = with_thread(|s| std::mem::take(&mut s.workers));
    if slots.is_empty() {
        return true;
    }

    let mut all_waiting = true;
    let mut scanned = Vec::with_capacity(slots.len());
    for slot in slots {
        match slot {
            WorkerSlot::Strong { object, record } => {
                // Unlocked flag read: only the parent moves a child out of
                // the waiting state, and the parent is this thread.
                let idle =
                    record.receive_port.is_waiting() || record.receive_port.is_disconnected();
                if idle {
                    match make_weak(&object, context) {
                        Ok(weak) => {
                            trace!(worker = record.id, "demoting idle worker handle");
                            scanned.push(WorkerSlot::Demoted { weak, record });
                        }
                        Err(e) => {
                            warn!(worker = record.id, error = %e, "could not demote worker handle");
                            scanned.push(WorkerSlot::Strong { object, record });
                        }
                    }
                } else {
                    all_waiting = false;
                    scanned.push(WorkerSlot::Strong { object, record });
                }
            }
            demoted => scanned.push(demoted),
        }
    }

    // Force a collection. Demoted handles whose only remaining reference
    // was the slot get finalised here, releasing their receive ports. The
    // kept-objects list must be cleared first or the WeakRefs created above
    // would pin their own targets until the next job boundary.
    context.clear_kept_objects();
    boa_gc::force_collect();

    let mut kept = Vec::with_capacity(scanned.len());
    for slot in scanned {
        match slot {
            WorkerSlot::Demoted { weak, record } => match deref_weak(&weak, context) {
                Ok(Some(object)) => {
                    // Survived: user code still references the handle.
                    kept.push(WorkerSlot::Strong { object, record });
                }
                Ok(None) => {
                    debug_assert!(
                        record.receive_port.is_waiting() || record.receive_port.is_disconnected()
                    );
                    debug_assert!(record.finalised.load(Ordering::SeqCst));
                    debug!(worker = record.id, "worker handle collected");
                }
                Err(e) => {
                    warn!(worker = record.id, error = %e, "weak deref failed");
                    kept.push(WorkerSlot::Demoted { weak, record });
                }
            },
            strong => kept.push(strong),
        }
    }
    with_thread(|s| s.workers = kept);

    all_waiting
}

// ============================================================================
// Run loop
// ============================================================================

/// Dequeue the next message for this thread, blocking while senders remain.
///
/// Returns `None` when the port has terminated, when no sender is left, or
/// (on the root thread) when the whole worker tree has gone idle.
fn next_message(
    receive: &Arc<Port>,
    parent: Option<&Arc<Port>>,
    context: &mut Context,
) -> Option<Message> {
    let mut state = receive.lock();
    if receive.is_terminated() {
        return None;
    }
    if state.is_empty() && state.refcount() > 0 {
        match parent {
            Some(parent) => {
                // Reacquire in ancestor-before-descendant order. A send from
                // the parent now serialises behind the lock we are about to
                // take, so the waiting flag set below cannot go stale before
                // the parent observes it.
                drop(state);
                let parent_state = parent.lock();
                state = receive.lock();
                let mut quiescent = try_collect_workers(&state, context);
                quiescent |= state.refcount() == 1;
                if state.is_empty() && quiescent {
                    trace!("subtree quiescent, signalling parent");
                    receive.set_waiting(true);
                    parent.notify();
                }
                drop(parent_state);
            }
            None => {
                // Root thread: once every child is idle, nothing can
                // produce work again.
                if try_collect_workers(&state, context) {
                    return None;
                }
            }
        }
        if state.is_empty() && state.refcount() > 0 {
            trace!(senders = state.refcount(), "sleeping on receive port");
            state = receive.wait(state);
        }
        debug_assert!(!receive.is_waiting() || state.is_empty());
    }
    state.take_head()
}

/// Decode a payload and invoke the matching `onMessage` callback.
fn dispatch_message(msg: Message, context: &mut Context) {
    let payload = match serde_json::from_str::<serde_json::Value>(&msg.contents) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "dropping undecodable message payload");
            return;
        }
    };
    let value = match JsValue::from_json(&payload, context) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "dropping message payload the engine rejected");
            return;
        }
    };

    let (this, callback) = match msg.receiver {
        None => {
            let global = context.global_object();
            let callback = global.get(js_string!("onMessage"), context);
            (JsValue::from(global), callback)
        }
        Some(id) => {
            let handle = with_thread(|state| {
                state.workers.iter().find_map(|slot| match slot {
                    WorkerSlot::Strong { object, record } if record.id == id => {
                        Some(object.clone())
                    }
                    _ => None,
                })
            });
            match handle {
                Some(object) => {
                    let callback = object.get(js_string!("onMessage"), context);
                    (JsValue::from(object), callback)
                }
                // Receiver already finalised; drop silently.
                None => return,
            }
        }
    };

    let callback = match callback {
        Ok(v) => v,
        Err(_) => return,
    };
    if let Some(callback) = callback.as_callable() {
        if let Err(e) = callback.call(&this, &[value], context) {
            // An uncaught error aborts this dispatch only; the worker keeps
            // draining its port.
            eprintln!("uncaught error in onMessage: {}", e);
        }
    }
}

/// Drain the current thread's receive port, dispatching each message and
/// interleaving collection attempts, until the port terminates, the last
/// sender disappears, or (on the root thread) the whole tree goes idle.
pub(crate) fn run_message_loop(context: &mut Context) {
    let (receive, parent) = with_thread(|state| {
        (
            Arc::clone(&state.receive_port),
            state.record.as_ref().map(|r| Arc::clone(&r.parent_port)),
        )
    });
    let is_root = parent.is_none();

    loop {
        if let Some(msg) = next_message(&receive, parent.as_ref(), context) {
            if receive.is_terminated() {
                // Terminated while we were waiting; the message is dropped.
                break;
            }
            dispatch_message(msg, context);
        }
        if receive.is_terminated() {
            break;
        }
        let all_idle = {
            let state = receive.lock();
            try_collect_workers(&state, context)
        };
        if all_idle && is_root {
            return;
        }
        if receive.lock().refcount() == 0 {
            break;
        }
    }
    debug!("run loop exiting");
}

// ============================================================================
// Worker thread lifecycle
// ============================================================================

/// Entry point for a worker's OS thread: fresh context, worker globals,
/// script load, then the message loop. A load or top-level evaluation
/// failure skips the loop and goes straight to shutdown, so the parent's
/// next rendezvous can reclaim the worker.
fn worker_thread(record: Arc<WorkerRecord>) {
    debug!(worker = record.id, file = %record.file.display(), "worker thread starting");
    init_thread(Arc::clone(&record.receive_port), Some(Arc::clone(&record)));

    let mut context = match super::build_context() {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("worker failed to create a context: {}", e);
            cleanup_worker(record, None);
            return;
        }
    };
    if let Err(e) = register_worker_globals(&mut context) {
        eprintln!("worker failed to install globals: {}", e);
        cleanup_worker(record, Some(context));
        return;
    }

    match std::fs::read_to_string(&record.file) {
        Ok(source) => match context.eval(Source::from_bytes(source.as_bytes())) {
            Ok(_) => run_message_loop(&mut context),
            Err(e) => eprintln!("error in worker script {}: {}", record.file.display(), e),
        },
        Err(e) => eprintln!(
            "failed to load worker script {}: {}",
            record.file.display(),
            e
        ),
    }

    cleanup_worker(record, Some(context));
}

/// Shut a worker thread down: tear down its own children, drop the engine
/// context, then hold the receive port open until every sender is gone.
fn cleanup_worker(record: Arc<WorkerRecord>, context: Option<Context>) {
    if let Some(context) = context {
        teardown_thread();
        drop(context);
    }

    record.receive_port.disconnect();
    // The parent may be asleep waiting for this subtree to become
    // collectable; the disconnect makes it so.
    record.parent_port.notify_locked();

    {
        let mut state = record.receive_port.lock();
        while state.refcount() > 0 {
            trace!(worker = record.id, "waiting for the last sender to disappear");
            state = record.receive_port.wait(state);
        }
        state.drain();
    }
    record.parent_port.release();
    debug!(worker = record.id, "worker thread exiting");
}

/// Terminate, finalise and join every worker still registered on this
/// thread. Runs on worker shutdown and on `Runtime` drop, so embedders and
/// tests do not leak threads; the original model relied on process exit.
pub(crate) fn teardown_thread() {
    let slots = THREAD_STATE
        .with(|cell| {
            cell.borrow_mut()
                .as_mut()
                .map(|state| std::mem::take(&mut state.workers))
        })
        .unwrap_or_default();

    for slot in slots {
        let record = Arc::clone(slot.record());
        drop(slot);
        record.receive_port.terminate();
        finalise_record(&record);
        let handle = record.thread.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

/// Number of slots in this thread's workers array.
#[cfg(test)]
pub(crate) fn active_workers() -> usize {
    THREAD_STATE.with(|cell| cell.borrow().as_ref().map_or(0, |state| state.workers.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_record(receive_refcount: usize) -> Arc<WorkerRecord> {
        Arc::new(WorkerRecord {
            id: NEXT_WORKER_ID.fetch_add(1, Ordering::SeqCst),
            file: PathBuf::from("worker.js"),
            receive_port: Port::with_refcount(receive_refcount),
            parent_port: Port::with_refcount(1),
            finalised: AtomicBool::new(false),
            thread: Mutex::new(None),
        })
    }

    #[test]
    fn test_finalise_record_releases_once() {
        let record = test_record(1);
        finalise_record(&record);
        assert_eq!(record.receive_port.lock().refcount(), 0);
        // A spurious second finalisation must not release again.
        finalise_record(&record);
        assert_eq!(record.receive_port.lock().refcount(), 0);
    }

    #[test]
    fn test_worker_ids_are_unique() {
        let a = test_record(1);
        let b = test_record(1);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_teardown_without_state_is_a_no_op() {
        // Not initialised on this test thread; must not panic.
        teardown_thread();
    }

    #[test]
    fn test_init_thread_installs_state() {
        let port = init_main_thread();
        let (installed, record) =
            with_thread(|state| (Arc::clone(&state.receive_port), state.record.clone()));
        assert!(Arc::ptr_eq(&port, &installed));
        assert!(record.is_none());
    }
}
