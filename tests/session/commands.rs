use crate::assert_precondition;
use crate::common::{
    issue, ready_session, result, split_token, start_program, sync_result,
};
use gdbmux::session::state::Violation;
use gdbmux::session::{Execution, InterruptStrategy, Lifecycle, SessionConfig};
use gdbmux::SessionError;

#[test]
fn test_idle_session_rejects_program_commands() {
    let (session, gdb) = ready_session(SessionConfig::default());

    assert_precondition!(
        sync_result(|k| session.step_over(&[], k)),
        Violation::NotDebugging
    );
    assert_precondition!(
        sync_result(|k| session.continue_execution(&[], k)),
        Violation::NotDebugging
    );
    assert_precondition!(
        sync_result(|k| session.eval_expression("x", k)),
        Violation::NotDebugging
    );
    assert_precondition!(sync_result(|k| session.pause(k)), Violation::NotDebugging);
    assert_precondition!(sync_result(|k| session.stop(k)), Violation::NotDebugging);
    assert_precondition!(
        sync_result(|k| session.list_breakpoints(k)),
        Violation::NotDebugging
    );

    gdb.assert_silent();
}

#[test]
fn test_precondition_error_names_command() {
    let (session, _gdb) = ready_session(SessionConfig::default());
    let err = sync_result(|k| session.step_into(&[], k))
        .unwrap()
        .unwrap_err();
    assert!(err.is_precondition());
    assert!(!err.is_fatal());
    assert_eq!(err.to_string(), "step into: not debugging a program");
}

#[test]
fn test_active_session_rejects_load_and_run() {
    let (session, mut gdb) = ready_session(SessionConfig::default());
    start_program(&session, &mut gdb, 42);

    assert_precondition!(
        sync_result(|k| session.load("/bin/other", &[], k)),
        Violation::AlreadyDebugging
    );
    assert_precondition!(
        sync_result(|k| session.run(&[], k)),
        Violation::AlreadyDebugging
    );
    assert_precondition!(sync_result(|k| session.pause(k)), Violation::ProgramStopped);
    gdb.assert_silent();
}

#[test]
fn test_running_program_rejects_stopped_commands() {
    let (session, mut gdb) = ready_session(SessionConfig::default());
    start_program(&session, &mut gdb, 42);

    let cont = issue(|k| session.continue_execution(&[], k));
    let line = gdb.expect_command();
    let (token, _) = split_token(&line);
    gdb.send(&format!("*running,thread-id=\"all\"\n{token}^running\n(gdb)\n"));
    result(&cont).unwrap();
    assert_eq!(session.execution(), Execution::Running);

    assert_precondition!(
        sync_result(|k| session.step_over(&[], k)),
        Violation::ProgramRunning
    );
    assert_precondition!(
        sync_result(|k| session.set_variable("x", "1", k)),
        Violation::ProgramRunning
    );
    gdb.assert_silent();

    // detached sessions interrupt with the debugger command
    let pause = issue(|k| session.pause(k));
    assert_eq!(gdb.reply("done"), "-exec-interrupt");
    result(&pause).unwrap();
}

#[test]
fn test_replies_out_of_order() {
    let (session, mut gdb) = ready_session(SessionConfig::default());
    start_program(&session, &mut gdb, 42);

    let first = issue(|k| session.eval_expression("a", k));
    let second = issue(|k| session.eval_expression("b", k));
    let third = issue(|k| session.eval_expression("c", k));

    let lines: Vec<_> = (0..3).map(|_| gdb.expect_command()).collect();
    for line in lines.iter().rev() {
        let (token, command) = split_token(line);
        let expr = command.rsplit(' ').next().unwrap();
        gdb.send(&format!("{token}^done,value=\"{expr}\"\n(gdb)\n"));
    }

    for (rx, expected) in [(first, "a"), (second, "b"), (third, "c")] {
        let record = result(&rx).unwrap();
        assert_eq!(record.payload.get_str("value"), Some(expected));
    }
}

#[test]
fn test_debugger_error_reply() {
    let (session, mut gdb) = ready_session(SessionConfig::default());
    start_program(&session, &mut gdb, 42);

    let eval = issue(|k| session.eval_expression("nope", k));
    gdb.reply("error,msg=\"No symbol \\\"nope\\\" in current context.\"");
    match result(&eval) {
        Err(SessionError::Rejected(msg)) => {
            assert_eq!(msg, "No symbol \"nope\" in current context.")
        }
        other => panic!("unexpected result: {other:?}"),
    }

    // a rejected command does not affect the session
    assert_eq!(session.lifecycle(), Lifecycle::Active);
    let eval = issue(|k| session.eval_expression("1", k));
    gdb.reply("done,value=\"1\"");
    assert!(result(&eval).is_ok());
}

#[test]
fn test_command_arguments() {
    let (session, mut gdb) = ready_session(SessionConfig::default());
    start_program(&session, &mut gdb, 42);

    let set = issue(|k| session.set_variable("s", "\"a b\"", k));
    assert_eq!(
        gdb.reply("done,value=\"\\\"a b\\\"\""),
        "-data-evaluate-expression \"s=\\\"a b\\\"\""
    );
    result(&set).unwrap();

    let frame = issue(|k| session.set_selected_frame(2, k));
    assert_eq!(gdb.reply("done"), "-stack-select-frame 2");
    result(&frame).unwrap();

    let info = issue(|k| session.selected_frame_info(k));
    assert_eq!(
        gdb.reply("done,frame={level=\"2\",func=\"calc\"}"),
        "-stack-info-frame"
    );
    let record = result(&info).unwrap();
    assert_eq!(
        record.payload.get("frame").and_then(|f| f.get_str("func")),
        Some("calc")
    );

    let vars = issue(|k| session.list_variables(&["--simple-values"], k));
    assert_eq!(
        gdb.reply("done,variables=[{name=\"x\",type=\"int\",value=\"1\"}]"),
        "-stack-list-variables --simple-values"
    );
    result(&vars).unwrap();
}

#[test]
fn test_breakpoint_commands() {
    let (session, mut gdb) = ready_session(SessionConfig::default());
    start_program(&session, &mut gdb, 42);

    let insert = issue(|k| session.insert_breakpoint(&["prog.c:10"], k));
    assert_eq!(
        gdb.reply("done,bkpt={number=\"2\",type=\"breakpoint\",line=\"10\"}"),
        "-break-insert prog.c:10"
    );
    let record = result(&insert).unwrap();
    assert_eq!(
        record.payload.get("bkpt").and_then(|b| b.get_str("number")),
        Some("2")
    );

    let disable = issue(|k| session.disable_breakpoints(&["1", "2"], k));
    assert_eq!(gdb.reply("done"), "-break-disable 1 2");
    result(&disable).unwrap();

    let enable = issue(|k| session.enable_breakpoints(&["2"], k));
    assert_eq!(gdb.reply("done"), "-break-enable 2");
    result(&enable).unwrap();

    let delete = issue(|k| session.delete_breakpoints(&["1"], k));
    assert_eq!(gdb.reply("done"), "-break-delete 1");
    result(&delete).unwrap();

    let list = issue(|k| session.list_breakpoints(k));
    assert_eq!(gdb.reply("done,BreakpointTable={nr_rows=\"1\"}"), "-break-list");
    result(&list).unwrap();
}

#[test]
fn test_load_inserts_configured_breakpoints() {
    let config = SessionConfig {
        breakpoints: vec!["main".to_string(), "prog.c:28".to_string()],
        ..SessionConfig::default()
    };
    let (session, mut gdb) = ready_session(config);

    let load = issue(|k| session.load("/tmp/my prog", &["-v", "2"], k));
    assert_eq!(gdb.reply("done"), "-gdb-set mi-async on");
    assert_eq!(
        gdb.reply("done"),
        "-file-exec-and-symbols \"/tmp/my prog\""
    );
    assert_eq!(gdb.reply("done,bkpt={number=\"1\"}"), "-break-insert main");
    assert_eq!(gdb.reply("done,bkpt={number=\"2\"}"), "-break-insert prog.c:28");
    assert_eq!(gdb.reply("done"), "-exec-arguments -v 2");
    result(&load).unwrap();
    assert_eq!(session.lifecycle(), Lifecycle::Idle);
}

#[test]
fn test_load_stops_at_first_failure() {
    let config = SessionConfig {
        breakpoints: vec!["nowhere".to_string()],
        ..SessionConfig::default()
    };
    let (session, mut gdb) = ready_session(config);

    let load = issue(|k| session.load("/bin/prog", &[], k));
    assert_eq!(gdb.reply("done"), "-gdb-set mi-async on");
    assert_eq!(gdb.reply("done"), "-file-exec-and-symbols /bin/prog");
    gdb.reply("error,msg=\"Function \\\"nowhere\\\" not defined.\"");
    assert!(matches!(result(&load), Err(SessionError::Rejected(_))));
    gdb.assert_silent();
}

#[test]
fn test_failed_run_returns_to_idle() {
    let (session, mut gdb) = ready_session(SessionConfig::default());

    let run = issue(|k| session.run(&[], k));
    assert_eq!(session.lifecycle(), Lifecycle::Active);
    assert_eq!(
        gdb.reply("error,msg=\"No executable file specified.\""),
        "-exec-run"
    );
    assert!(matches!(result(&run), Err(SessionError::Rejected(_))));
    assert_eq!(session.lifecycle(), Lifecycle::Idle);

    assert_precondition!(
        sync_result(|k| session.step_over(&[], k)),
        Violation::NotDebugging
    );
}

#[test]
fn test_stop_kills_program() {
    let (session, mut gdb) = ready_session(SessionConfig::default());
    start_program(&session, &mut gdb, 42);

    let stop = issue(|k| session.stop(k));
    let line = gdb.expect_command();
    let (token, command) = split_token(&line);
    assert_eq!(command, "kill");
    gdb.send(&format!(
        "=thread-exited,id=\"1\",group-id=\"i1\"\n=thread-group-exited,id=\"i1\"\n{token}^done\n(gdb)\n"
    ));
    result(&stop).unwrap();
    assert_eq!(session.lifecycle(), Lifecycle::Idle);
}

#[test]
fn test_stop_pauses_running_program_first() {
    let (session, mut gdb) = ready_session(SessionConfig::default());
    start_program(&session, &mut gdb, 42);

    let cont = issue(|k| session.continue_execution(&[], k));
    let line = gdb.expect_command();
    let (token, _) = split_token(&line);
    gdb.send(&format!("*running,thread-id=\"all\"\n{token}^running\n(gdb)\n"));
    result(&cont).unwrap();

    let stop = issue(|k| session.stop(k));
    let line = gdb.expect_command();
    let (token, command) = split_token(&line);
    assert_eq!(command, "-exec-interrupt");
    gdb.send(&format!(
        "{token}^done\n(gdb)\n*stopped,reason=\"signal-received\",signal-name=\"SIGINT\"\n(gdb)\n"
    ));

    let line = gdb.expect_command();
    let (token, command) = split_token(&line);
    assert_eq!(command, "kill");
    gdb.send(&format!("=thread-group-exited,id=\"i1\"\n{token}^done\n(gdb)\n"));
    result(&stop).unwrap();
    assert_eq!(session.lifecycle(), Lifecycle::Idle);
}

#[test]
fn test_native_interrupt_enables_async_mode_once() {
    let (session, mut gdb) = ready_session(SessionConfig::default());

    let load = issue(|k| session.load("/bin/prog", &[], k));
    assert_eq!(gdb.reply("done"), "-gdb-set mi-async on");
    assert_eq!(gdb.reply("done"), "-file-exec-and-symbols /bin/prog");
    assert_eq!(gdb.reply("done"), "-exec-arguments");
    result(&load).unwrap();

    let load = issue(|k| session.load("/bin/other", &[], k));
    assert_eq!(gdb.reply("done"), "-file-exec-and-symbols /bin/other");
    assert_eq!(gdb.reply("done"), "-exec-arguments");
    result(&load).unwrap();

    // a failed setup step is issued again by the next load
    let config = SessionConfig {
        interrupt: Some(InterruptStrategy::Native),
        ..SessionConfig::default()
    };
    let (session, mut gdb) = ready_session(config);
    let load = issue(|k| session.load("/bin/prog", &[], k));
    gdb.reply("error,msg=\"Undefined set command\"");
    assert!(matches!(result(&load), Err(SessionError::Rejected(_))));
    let load = issue(|k| session.load("/bin/prog", &[], k));
    assert_eq!(gdb.reply("done"), "-gdb-set mi-async on");
    gdb.reply("done");
    gdb.reply("done");
    result(&load).unwrap();
}
