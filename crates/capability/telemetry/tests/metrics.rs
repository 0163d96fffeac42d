use gw_telemetry::{metrics, new_request_ids, record_command, record_frame_received};

#[test]
fn request_ids_non_empty() {
    let ids = new_request_ids();
    assert!(!ids.request_id.is_empty());
    assert!(!ids.trace_id.is_empty());
}

#[test]
fn counters_accumulate() {
    let before = metrics().snapshot();
    record_frame_received();
    record_command(true);
    record_command(false);
    let after = metrics().snapshot();
    assert!(after.frames_received >= before.frames_received + 1);
    assert!(after.commands_sent >= before.commands_sent + 1);
    assert!(after.commands_failed >= before.commands_failed + 1);
}
