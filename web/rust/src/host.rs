//! The browser event loop.
//!
//! The browser gives us three ways to be called back: a message
//! posted to our own window (runs as soon as pending events have been
//! processed), `setTimeout` (runs after a delay) and
//! `requestAnimationFrame` (runs before the next repaint).  We use
//! them for immediate continuations, deferred continuations and
//! frames respectively.  Each callback is a closure created once,
//! holding only a weak reference back to the [`Host`].
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use pacer::{
    Continuation, ContinuationToken, FrameToken, HostInputEvent, InputKinds, InputResponse, Next,
    Schedule, StopHandle, TickScheduler,
};
use tracing::{event, Level};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{
    Document, Event, HtmlCanvasElement, KeyboardEvent, MessageEvent, MouseEvent, Window,
};

use crate::clock::{timeout_millis, BrowserClock};
use crate::input;
use crate::native::JsMachine;

pub(crate) type Scheduler = TickScheduler<JsMachine, BrowserClock>;

/// The message we post to ourselves for an immediate continuation.
const TICK_MESSAGE: &str = "zzt_tick";

struct Callbacks {
    message: Closure<dyn FnMut(MessageEvent)>,
    timeout: Closure<dyn FnMut()>,
    frame: Closure<dyn FnMut(f64)>,
    key_down: Closure<dyn FnMut(KeyboardEvent)>,
    key_up: Closure<dyn FnMut(KeyboardEvent)>,
    mouse_move: Closure<dyn FnMut(MouseEvent)>,
    mouse_down: Closure<dyn FnMut(MouseEvent)>,
    mouse_up: Closure<dyn FnMut(MouseEvent)>,
}

impl Callbacks {
    fn new(host: &Weak<Host>) -> Callbacks {
        fn make<A: 'static, F>(host: &Weak<Host>, f: F) -> Box<dyn FnMut(A)>
        where
            F: Fn(&Host, A) + 'static,
        {
            let host = host.clone();
            Box::new(move |arg: A| {
                if let Some(host) = host.upgrade() {
                    f(&host, arg);
                }
            })
        }

        let timeout_host = host.clone();
        Callbacks {
            message: Closure::wrap(make(host, Host::on_message)),
            timeout: Closure::wrap(Box::new(move || {
                if let Some(host) = timeout_host.upgrade() {
                    host.on_timeout();
                }
            }) as Box<dyn FnMut()>),
            frame: Closure::wrap(make(host, Host::on_frame)),
            key_down: Closure::wrap(make(host, |host: &Host, e: KeyboardEvent| {
                host.dispatch(&input::key_down(&e, &host.canvas), &e)
            })),
            key_up: Closure::wrap(make(host, |host: &Host, e: KeyboardEvent| {
                host.dispatch(&input::key_up(&e, &host.canvas), &e)
            })),
            mouse_move: Closure::wrap(make(host, |host: &Host, e: MouseEvent| {
                host.dispatch(&input::mouse_move(&e, &host.canvas), &e)
            })),
            mouse_down: Closure::wrap(make(host, |host: &Host, e: MouseEvent| {
                if let Some(input) = input::mouse_down(&e, &host.canvas) {
                    host.dispatch(&input, &e);
                }
            })),
            mouse_up: Closure::wrap(make(host, |host: &Host, e: MouseEvent| {
                if let Some(input) = input::mouse_up(&e, &host.canvas) {
                    host.dispatch(&input, &e);
                }
            })),
        }
    }
}

fn as_function<T: ?Sized>(closure: &Closure<T>) -> &js_sys::Function {
    closure.as_ref().unchecked_ref()
}

pub(crate) struct Host {
    window: Window,
    document: Document,
    canvas: HtmlCanvasElement,
    scheduler: RefCell<Scheduler>,
    stop: StopHandle,
    immediate: Cell<Option<ContinuationToken>>,
    deferred: Cell<Option<ContinuationToken>>,
    timeout_id: Cell<Option<i32>>,
    frame: Cell<Option<FrameToken>>,
    frame_request: Cell<Option<i32>>,
    attached: Cell<bool>,
    callbacks: Callbacks,
}

impl Host {
    pub(crate) fn new(
        window: Window,
        document: Document,
        canvas: HtmlCanvasElement,
        mut scheduler: Scheduler,
    ) -> Rc<Host> {
        scheduler.route_surface(input::CANVAS, InputKinds::ALL);
        let stop = scheduler.stop_handle();
        Rc::new_cyclic(|weak| Host {
            window,
            document,
            canvas,
            scheduler: RefCell::new(scheduler),
            stop,
            immediate: Cell::new(None),
            deferred: Cell::new(None),
            timeout_id: Cell::new(None),
            frame: Cell::new(None),
            frame_request: Cell::new(None),
            attached: Cell::new(false),
            callbacks: Callbacks::new(weak),
        })
    }

    pub(crate) fn scheduler(&self) -> &RefCell<Scheduler> {
        &self.scheduler
    }

    /// Installs the event listeners and runs the first quantum.
    pub(crate) fn start(&self) -> Result<(), JsValue> {
        self.attach()?;
        self.update_focus();
        let schedule = match self.scheduler.try_borrow_mut() {
            Ok(mut scheduler) => scheduler.start(),
            Err(e) => {
                event!(Level::ERROR, "cannot start the emulation: {e}");
                None
            }
        };
        if let Some(schedule) = schedule {
            self.arm(schedule);
        }
        Ok(())
    }

    pub(crate) fn stop(&self) {
        self.stop.stop();
        self.settle_stopped();
    }

    /// Releases everything a stopped emulation held.  If the scheduler
    /// is busy, this is repeated when its quantum is armed.
    fn settle_stopped(&self) {
        if let Ok(mut scheduler) = self.scheduler.try_borrow_mut() {
            scheduler.stop();
            scheduler.unroute_surface(input::CANVAS);
        }
        self.cancel_callbacks();
        self.detach();
    }

    fn attach(&self) -> Result<(), JsValue> {
        if self.attached.replace(true) {
            return Ok(());
        }
        let callbacks = &self.callbacks;
        self.window.add_event_listener_with_callback_and_bool(
            "message",
            as_function(&callbacks.message),
            true,
        )?;
        self.document
            .add_event_listener_with_callback("keydown", as_function(&callbacks.key_down))?;
        self.document
            .add_event_listener_with_callback("keyup", as_function(&callbacks.key_up))?;
        self.canvas
            .add_event_listener_with_callback("mousemove", as_function(&callbacks.mouse_move))?;
        self.canvas
            .add_event_listener_with_callback("mousedown", as_function(&callbacks.mouse_down))?;
        self.canvas
            .add_event_listener_with_callback("mouseup", as_function(&callbacks.mouse_up))?;
        Ok(())
    }

    fn detach(&self) {
        if !self.attached.replace(false) {
            return;
        }
        let callbacks = &self.callbacks;
        let results = [
            self.window.remove_event_listener_with_callback_and_bool(
                "message",
                as_function(&callbacks.message),
                true,
            ),
            self.document
                .remove_event_listener_with_callback("keydown", as_function(&callbacks.key_down)),
            self.document
                .remove_event_listener_with_callback("keyup", as_function(&callbacks.key_up)),
            self.canvas.remove_event_listener_with_callback(
                "mousemove",
                as_function(&callbacks.mouse_move),
            ),
            self.canvas.remove_event_listener_with_callback(
                "mousedown",
                as_function(&callbacks.mouse_down),
            ),
            self.canvas
                .remove_event_listener_with_callback("mouseup", as_function(&callbacks.mouse_up)),
        ];
        for e in results.into_iter().filter_map(Result::err) {
            event!(Level::ERROR, "failed to remove an event listener: {e:?}");
        }
    }

    fn cancel_callbacks(&self) {
        self.immediate.set(None);
        self.deferred.set(None);
        self.frame.set(None);
        if let Some(id) = self.timeout_id.take() {
            self.window.clear_timeout_with_handle(id);
        }
        if let Some(id) = self.frame_request.take() {
            if let Err(e) = self.window.cancel_animation_frame(id) {
                event!(Level::ERROR, "failed to cancel frame request {id}: {e:?}");
            }
        }
    }

    fn update_focus(&self) {
        let focused = match self.document.has_focus() {
            Ok(focused) => focused,
            Err(e) => {
                event!(Level::ERROR, "document.hasFocus() failed: {e:?}");
                true
            }
        };
        if let Ok(mut scheduler) = self.scheduler.try_borrow_mut() {
            scheduler.set_host_focus(focused);
        }
    }

    /// Registers the callbacks `schedule` asks for.
    fn arm(&self, schedule: Schedule) {
        if self.stop.is_stopped() {
            self.settle_stopped();
            return;
        }
        match schedule.next {
            Next::Continue(Continuation::Immediate(token)) => {
                self.immediate.set(Some(token));
                if let Err(e) = self
                    .window
                    .post_message(&JsValue::from_str(TICK_MESSAGE), "*")
                {
                    event!(Level::ERROR, "postMessage failed: {e:?}");
                }
            }
            Next::Continue(Continuation::Deferred { token, after }) => {
                self.deferred.set(Some(token));
                match self
                    .window
                    .set_timeout_with_callback_and_timeout_and_arguments_0(
                        as_function(&self.callbacks.timeout),
                        timeout_millis(after),
                    ) {
                    Ok(id) => self.timeout_id.set(Some(id)),
                    Err(e) => event!(Level::ERROR, "setTimeout failed: {e:?}"),
                }
            }
            Next::Halted => {
                self.cancel_callbacks();
                self.detach();
            }
            Next::Stopped => self.settle_stopped(),
        }
        if let Some(token) = schedule.frame {
            self.frame.set(Some(token));
            match self
                .window
                .request_animation_frame(as_function(&self.callbacks.frame))
            {
                Ok(id) => self.frame_request.set(Some(id)),
                Err(e) => event!(Level::ERROR, "requestAnimationFrame failed: {e:?}"),
            }
        }
    }

    fn resume(&self, token: ContinuationToken) {
        self.update_focus();
        let schedule = match self.scheduler.try_borrow_mut() {
            Ok(mut scheduler) => scheduler.resume(token),
            Err(e) => {
                event!(Level::ERROR, "cannot resume {token:?}: {e}");
                None
            }
        };
        if let Some(schedule) = schedule {
            self.arm(schedule);
        }
    }

    fn on_message(&self, event: MessageEvent) {
        if event.data().as_string().as_deref() != Some(TICK_MESSAGE) {
            return;
        }
        event.stop_propagation();
        match self.immediate.take() {
            Some(token) => self.resume(token),
            None => event!(Level::TRACE, "tick message with no pending continuation"),
        }
    }

    fn on_timeout(&self) {
        self.timeout_id.set(None);
        if let Some(token) = self.deferred.take() {
            self.resume(token);
        }
    }

    fn on_frame(&self, _timestamp: f64) {
        self.frame_request.set(None);
        let Some(token) = self.frame.take() else {
            return;
        };
        let pads = input::poll_gamepads(&self.window.navigator());
        match self.scheduler.try_borrow_mut() {
            Ok(mut scheduler) => {
                scheduler.present(token, &pads);
            }
            Err(e) => event!(Level::ERROR, "cannot present {token:?}: {e}"),
        }
    }

    fn dispatch(&self, input: &HostInputEvent, dom_event: &Event) {
        let response = match self.scheduler.try_borrow_mut() {
            Ok(mut scheduler) => scheduler.handle_input(input),
            Err(e) => {
                event!(Level::ERROR, "dropping input {input:?}: {e}");
                InputResponse::NotRouted
            }
        };
        if response.suppress_default() {
            dom_event.prevent_default();
        }
        if response == InputResponse::CapturePointer {
            self.canvas.request_pointer_lock();
        }
    }
}

impl Drop for Host {
    fn drop(&mut self) {
        self.cancel_callbacks();
        self.detach();
    }
}
