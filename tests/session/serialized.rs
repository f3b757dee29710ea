use crate::assert_precondition;
use crate::common::{eventually, issue, ready_session, result, FakeGdb};
use gdbmux::session::state::Violation;
use gdbmux::session::{CorrelationStrategy, Execution, Lifecycle, Session, SessionConfig};
use gdbmux::SessionError;

fn serialized_config() -> SessionConfig {
    SessionConfig {
        correlation: CorrelationStrategy::Serialized,
        ..SessionConfig::default()
    }
}

#[test]
fn test_single_command_in_flight() {
    let (session, mut gdb) = ready_session(serialized_config());

    let load = issue(|k| session.load("/bin/prog", &[], k));
    // no tokens on the wire
    assert_eq!(gdb.expect_command(), "-gdb-set mi-async on");
    gdb.send("^done\n(gdb)\n");
    assert_eq!(gdb.expect_command(), "-file-exec-and-symbols /bin/prog");
    gdb.send("^done\n(gdb)\n");
    assert_eq!(gdb.expect_command(), "-exec-arguments");
    gdb.send("^done\n(gdb)\n");
    result(&load).unwrap();

    let run = issue(|k| session.run(&[], k));
    assert_eq!(gdb.expect_command(), "-exec-run");
    gdb.send("=thread-group-started,id=\"i1\",pid=\"42\"\n*running,thread-id=\"all\"\n^running\n(gdb)\n");
    let record = result(&run).unwrap();
    assert_eq!(record.class, "running");
    assert_eq!(session.lifecycle(), Lifecycle::Active);

    gdb.send("*stopped,reason=\"breakpoint-hit\",frame={func=\"main\"}\n(gdb)\n");
    assert!(eventually(|| session.execution() == Execution::Stopped));

    let first = issue(|k| session.eval_expression("a", k));
    let second = issue(|k| session.eval_expression("b", k));
    assert_eq!(gdb.expect_command(), "-data-evaluate-expression a");
    gdb.assert_silent();

    gdb.send("^done,value=\"1\"\n(gdb)\n");
    assert_eq!(result(&first).unwrap().payload.get_str("value"), Some("1"));

    assert_eq!(gdb.expect_command(), "-data-evaluate-expression b");
    gdb.send("^error,msg=\"No symbol \\\"b\\\" in current context.\"\n(gdb)\n");
    assert!(matches!(result(&second), Err(SessionError::Rejected(_))));
}

#[test]
fn test_command_waits_for_prompt() {
    let (session, mut gdb) = ready_session(serialized_config());

    let load = issue(|k| session.load("/bin/prog", &[], k));
    assert_eq!(gdb.expect_command(), "-gdb-set mi-async on");

    // a prompt with no reply belongs to earlier output
    gdb.send("=cmd-param-changed,param=\"x\",value=\"1\"\n(gdb)\n");
    gdb.assert_silent();
    assert!(load.try_recv().is_err());

    gdb.send("^done\n(gdb)\n");
    assert_eq!(gdb.expect_command(), "-file-exec-and-symbols /bin/prog");
    gdb.send("^done\n(gdb)\n");
    assert_eq!(gdb.expect_command(), "-exec-arguments");
    gdb.send("^done\n(gdb)\n");
    result(&load).unwrap();
}

#[test]
fn test_queued_commands_fail_on_teardown() {
    let (session, gdb) = ready_session(serialized_config());

    assert_eq!(session.correlation(), CorrelationStrategy::Serialized);
    let first = issue(|k| session.load("/bin/prog", &[], k));
    let second = issue(|k| session.quit(k));
    gdb.expect_command();
    gdb.assert_silent();
    assert_eq!(session.pending_commands(), 2);

    session.teardown();
    assert!(matches!(result(&first), Err(SessionError::Terminated)));
    assert!(matches!(result(&second), Err(SessionError::Terminated)));
}

/// Load and run `/bin/prog` one command at a time, stop at `main`.
fn start_serialized(session: &Session, gdb: &mut FakeGdb) {
    let load = issue(|k| session.load("/bin/prog", &[], k));
    for command in [
        "-gdb-set mi-async on",
        "-file-exec-and-symbols /bin/prog",
        "-exec-arguments",
    ] {
        assert_eq!(gdb.expect_command(), command);
        gdb.send("^done\n(gdb)\n");
    }
    result(&load).unwrap();

    let run = issue(|k| session.run(&[], k));
    assert_eq!(gdb.expect_command(), "-exec-run");
    gdb.send("=thread-group-started,id=\"i1\",pid=\"42\"\n*running,thread-id=\"all\"\n^running\n(gdb)\n");
    result(&run).unwrap();
    gdb.send("*stopped,reason=\"breakpoint-hit\",frame={func=\"main\"}\n(gdb)\n");
    assert!(eventually(|| session.execution() == Execution::Stopped));
}

#[test]
fn test_queued_command_rechecked_on_release() {
    let (session, mut gdb) = ready_session(serialized_config());
    start_serialized(&session, &mut gdb);

    let cont = issue(|k| session.continue_execution(&[], k));
    let eval = issue(|k| session.eval_expression("x", k));
    assert_eq!(gdb.expect_command(), "-exec-continue");
    gdb.assert_silent();

    gdb.send("*running,thread-id=\"all\"\n^running\n(gdb)\n");
    assert_eq!(result(&cont).unwrap().class, "running");
    assert_precondition!(
        eval.recv_timeout(crate::common::TIMEOUT).ok(),
        Violation::ProgramRunning
    );
    // the stopped-only command never reached the debugger
    gdb.assert_silent();
    assert_eq!(session.execution(), Execution::Running);
    assert_eq!(session.pending_commands(), 0);

    // the queue keeps working after a rejected entry
    let pause = issue(|k| session.pause(k));
    assert_eq!(gdb.expect_command(), "-exec-interrupt");
    gdb.send("^done\n(gdb)\n*stopped,reason=\"signal-received\"\n(gdb)\n");
    result(&pause).unwrap();
    assert!(eventually(|| session.execution() == Execution::Stopped));
}

#[test]
fn test_quit_resolves_on_exit() {
    let (session, mut gdb) = ready_session(serialized_config());

    let quit = issue(|k| session.quit(k));
    assert_eq!(gdb.expect_command(), "-gdb-exit");
    gdb.send("^exit\n");
    assert_eq!(result(&quit).unwrap().class, "exit");

    gdb.hang_up();
    assert!(eventually(|| session.is_terminated()));
}
