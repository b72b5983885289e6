//! Resource-bound span lifecycle: bind/replace semantics, destroy-time
//! closure, pid capture, and exit-status tagging.

mod common;

use pretty_assertions::assert_eq;

use lariat_core::{ExitDisposition, ResourceHandle, SpanStatus};

use common::test_tracer;

#[test]
fn stream_rebinding_replaces_the_entry_and_leaves_the_old_span_alone() {
    let tracer = test_tracer([]);
    let binder = tracer.binder();
    let context = tracer.context();

    let s1 = ResourceHandle::stream(101);
    let span_a = context.start_span("popen");
    let span_b = context.start_span("popen");

    assert!(binder.register_stream(&s1, &span_a));
    assert!(binder.register_stream(&s1, &span_b));

    // The table answers with the second span, never the first.
    let bound = binder.proc_get_span(s1.id()).expect("binding present");
    assert_eq!(bound.span_id(), span_b.span_id());

    // Destroying the stream finishes B only; A stays untouched.
    binder.on_resource_destroyed(s1.id());
    assert!(span_b.is_finished());
    assert!(!span_a.is_finished());
    assert_eq!(binder.len(), 0);
}

#[test]
fn process_destroy_reaps_and_records_the_exit_code() {
    let tracer = test_tracer([(4242, ExitDisposition::Exited(7))]);
    let binder = tracer.binder();

    let p1 = ResourceHandle::process(201, 4242);
    let span_c = tracer.context().start_span("command_execution");
    span_c.set_span_type("system");
    assert!(binder.proc_assoc_span(&p1, &span_c));

    // Pid lookup answers while the handle is alive...
    assert_eq!(binder.proc_get_pid(p1.id()), Some(4242));

    binder.on_resource_destroyed(p1.id());

    // ...and no longer afterwards.
    assert_eq!(binder.proc_get_pid(p1.id()), None);
    assert!(span_c.is_finished());
    assert_eq!(span_c.tag("cmd.exit_code").as_deref(), Some("7"));
    assert!(!span_c.error());
}

#[test]
fn signal_termination_is_an_error_with_the_signal_as_exit_code() {
    let tracer = test_tracer([(555, ExitDisposition::Signaled(9))]);
    let binder = tracer.binder();

    let handle = ResourceHandle::process(7, 555);
    let span = tracer.context().start_span("command_execution");
    binder.proc_assoc_span(&handle, &span);
    binder.on_resource_destroyed(handle.id());

    assert!(span.is_finished());
    assert!(span.error());
    assert_eq!(span.tag("cmd.exit_code").as_deref(), Some("9"));
    assert_eq!(
        span.tag("error.message").as_deref(),
        Some("The process was terminated by a signal")
    );
}

#[test]
fn status_captured_early_finishes_the_span_and_skips_the_destroy_reap() {
    // No scripted reap: the destroy path must not wait again once the
    // status observer already collected the child.
    let tracer = test_tracer([]);
    let binder = tracer.binder();

    let handle = ResourceHandle::process(11, 808);
    let span = tracer.context().start_span("command_execution");
    binder.proc_assoc_span(&handle, &span);

    assert!(binder.proc_capture_status(handle.id(), ExitDisposition::Exited(33)));
    assert!(span.is_finished());
    assert_eq!(span.tag("cmd.exit_code").as_deref(), Some("33"));

    // A second capture for the same handle changes nothing.
    assert!(!binder.proc_capture_status(handle.id(), ExitDisposition::Exited(1)));
    assert_eq!(span.tag("cmd.exit_code").as_deref(), Some("33"));

    binder.on_resource_destroyed(handle.id());
    assert_eq!(binder.len(), 0);
    // An attempted re-reap would have failed and tagged an error.
    assert!(!span.error());
}

#[test]
fn wrong_handle_kind_is_refused_without_mutation() {
    let tracer = test_tracer([]);
    let binder = tracer.binder();
    let span = tracer.context().start_span("mismatched");

    assert!(!binder.register_stream(&ResourceHandle::process(1, 100), &span));
    assert!(!binder.proc_assoc_span(&ResourceHandle::stream(2), &span));
    assert_eq!(binder.len(), 0);
    assert_eq!(span.status(), SpanStatus::Created);
}

#[test]
fn process_rebinding_deterministically_replaces() {
    let tracer = test_tracer([(32, ExitDisposition::Exited(0))]);
    let binder = tracer.binder();
    let context = tracer.context();

    let handle_first = ResourceHandle::process(55, 31);
    let handle_second = ResourceHandle::process(55, 32);
    let first = context.start_span("command_execution");
    let second = context.start_span("command_execution");

    assert!(binder.proc_assoc_span(&handle_first, &first));
    assert!(binder.proc_assoc_span(&handle_second, &second));

    assert_eq!(binder.proc_get_pid(handle_first.id()), Some(32));
    let bound = binder.proc_get_span(handle_first.id()).unwrap();
    assert_eq!(bound.span_id(), second.span_id());

    binder.on_resource_destroyed(handle_first.id());
    assert!(second.is_finished());
    assert!(!first.is_finished());
}

#[test]
fn destroy_of_untraced_resources_is_a_noop() {
    let tracer = test_tracer([]);
    tracer.binder().on_resource_destroyed(lariat_core::ResourceId(12345));
    assert_eq!(tracer.drain().len(), 0);
}

#[test]
fn resource_spans_do_not_finish_in_creation_order() {
    let tracer = test_tracer([]);
    let binder = tracer.binder();
    let context = tracer.context();

    let s1 = ResourceHandle::stream(1);
    let s2 = ResourceHandle::stream(2);
    let first = context.start_span("first-opened");
    let second = context.start_span("second-opened");
    binder.register_stream(&s1, &first);
    binder.register_stream(&s2, &second);

    // Teardown order is the resource's, not the creation order.
    binder.on_resource_destroyed(s2.id());
    binder.on_resource_destroyed(s1.id());

    let records = tracer.drain();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].name, "second-opened");
    assert_eq!(records[1].name, "first-opened");
}
