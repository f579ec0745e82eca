mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{DeviceScript, console_pair};
use rconsole::config::ProvisionConfig;
use rconsole::device::{DeviceState, PromptClassifier, PromptRule, default_rules};
use rconsole::error::ConsoleError;
use rconsole::session::{
    ConfigScript, ConsoleSession, ProvisionOutcome, ScriptedOperator, SessionRecordLevel,
    SessionRecorder, SessionReplayer, provision, provision_session,
};

fn router_script() -> ConfigScript {
    ConfigScript::parse("hostname R1\n!comment\ninterface Gi0/0")
}

#[tokio::test(start_paused = true)]
async fn boot_dialog_to_config_mode_then_push() {
    let device = DeviceScript::banner(
        "Would you like to enter the initial configuration dialog? [yes/no]: ",
    )
    .reply("no", "\r\nRouter>")
    .reply("en", "\r\nRouter#")
    .reply(
        "conf t",
        "\r\nEnter configuration commands, one per line.  End with CNTL/Z.\r\nRouter(config)#",
    );
    let (console, shutdowns, device) = console_pair(device);
    let mut operator = ScriptedOperator::accept_all().with_answers([true, false]);

    let report = provision(
        console,
        &router_script(),
        &ProvisionConfig::default(),
        &mut operator,
        None,
    )
    .await
    .expect("provision succeeds");

    let received = device.await.expect("device task");
    assert_eq!(
        received,
        vec!["no", "en", "conf t", "hostname R1", "interface Gi0/0"]
    );
    assert_eq!(report.outcome, ProvisionOutcome::Applied);
    assert_eq!(report.transitions.final_state, DeviceState::GlobalConfigMode);
    assert_eq!(report.transitions.retries, 0);
    assert_eq!(report.transitions.probes, 0);
    assert_eq!(
        report.transitions.states_seen,
        vec![
            DeviceState::InitialConfigDialog,
            DeviceState::UserExecMode,
            DeviceState::PrivilegedExecMode,
            DeviceState::GlobalConfigMode,
        ]
    );
    let push = report.push.expect("push report");
    assert_eq!((push.sent, push.skipped), (2, 1));
    assert!(!report.saved);
    assert!(report.response_log.iter().any(|line| line == "Router(config)#"));
    assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn login_and_enable_passwords_are_supplied() {
    let device = DeviceScript::banner("\r\nUser Access Verification\r\n\r\nPassword: ")
        .reply("cisco", "\r\nRouter>")
        .reply("en", "\r\nPassword: ")
        .reply("cisco", "\r\nRouter#")
        .reply("conf t", "\r\nRouter(config)#");
    let (console, shutdowns, device) = console_pair(device);
    let recorder = SessionRecorder::new(SessionRecordLevel::Full);
    let mut operator = ScriptedOperator::accept_all()
        .with_password("cisco")
        .with_answers([true, false]);

    let report = provision(
        console,
        &ConfigScript::parse("hostname R1"),
        &ProvisionConfig::default(),
        &mut operator,
        Some(recorder.clone()),
    )
    .await
    .expect("provision succeeds");

    let received = device.await.expect("device task");
    assert_eq!(received, vec!["cisco", "en", "cisco", "conf t", "hostname R1"]);
    assert_eq!(operator.password_requests(), 2);
    assert_eq!(report.transitions.retries, 0);
    assert_eq!(shutdowns.load(Ordering::SeqCst), 1);

    let jsonl = recorder.to_jsonl().expect("jsonl");
    assert!(!jsonl.contains("cisco"));
    let replayer = SessionReplayer::from_jsonl(&jsonl).expect("replayer");
    assert_eq!(
        replayer.commands(),
        vec!["<password>", "en", "<password>", "conf t"]
    );
}

#[tokio::test(start_paused = true)]
async fn declined_push_sends_nothing() {
    let (console, shutdowns, device) = console_pair(DeviceScript::banner("Router(config)#\r\n"));
    let mut operator = ScriptedOperator::decline_all();

    let report = provision(
        console,
        &router_script(),
        &ProvisionConfig::default(),
        &mut operator,
        None,
    )
    .await
    .expect("decline is not an error");

    assert_eq!(report.outcome, ProvisionOutcome::Declined);
    assert!(report.push.is_none());
    assert_eq!(operator.questions().len(), 1);
    assert!(device.await.expect("device task").is_empty());
    assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn save_after_push_writes_memory_without_asking() {
    let (console, shutdowns, device) = console_pair(DeviceScript::banner("Router(config)#\r\n"));
    let mut operator = ScriptedOperator::accept_all();
    let config = ProvisionConfig::default().with_save_after_push(true);

    let report = provision(console, &router_script(), &config, &mut operator, None)
        .await
        .expect("provision succeeds");

    assert!(report.saved);
    assert_eq!(operator.questions().len(), 1);
    assert_eq!(
        device.await.expect("device task"),
        vec!["hostname R1", "interface Gi0/0", "write memory"]
    );
    assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn long_push_keeps_every_echoed_line_in_the_log() {
    let device = DeviceScript::banner("R1(config)#\r\n").echo("R1(config)#");
    let (console, shutdowns, device) = console_pair(device);
    let mut operator = ScriptedOperator::accept_all().with_answers([true, false]);
    let config = ProvisionConfig::default().with_inter_line_delay(Duration::from_millis(10));
    let lines = (0..400)
        .map(|i| format!("interface Loopback{i}"))
        .collect::<Vec<_>>();
    let script = ConfigScript::parse(&lines.join("\n"));

    let report = provision(console, &script, &config, &mut operator, None)
        .await
        .expect("provision succeeds");

    assert_eq!(report.push.as_ref().map(|push| push.sent), Some(400));
    assert_eq!(report.response_log.len(), 401);
    for line in &lines {
        let echoed = format!("R1(config)#{line}");
        assert!(
            report.response_log.contains(&echoed),
            "missing echoed line '{echoed}'"
        );
    }
    assert_eq!(device.await.expect("device task").len(), 400);
    assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn silent_device_ends_with_classification_timeout() {
    let (console, shutdowns, device) = console_pair(DeviceScript::default());
    let mut operator = ScriptedOperator::accept_all();
    let config = ProvisionConfig::default()
        .with_max_retries(3)
        .with_wait_interval(Duration::from_secs(1));

    let err = match provision(console, &router_script(), &config, &mut operator, None).await {
        Ok(_) => panic!("silent device should not provision"),
        Err(err) => err,
    };

    assert!(matches!(err, ConsoleError::ClassificationTimeout(3)));
    assert_eq!(device.await.expect("device task"), vec!["", "", ""]);
    assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn unclassified_prompts_exhaust_retries() {
    let device = DeviceScript::default().chatter(
        Duration::from_secs(2),
        "% Unrecognized host or address, or protocol not running.\r\n",
    );
    let (console, shutdowns, device) = console_pair(device);
    let mut rules = vec![PromptRule::new(DeviceState::Unknown, [r"^% "])];
    rules.extend(default_rules());
    let classifier = PromptClassifier::from_rules(rules).expect("valid rules");
    let config = ProvisionConfig::default()
        .with_max_retries(3)
        .with_wait_interval(Duration::from_secs(3));
    let mut session =
        ConsoleSession::open_with_classifier(console, config, classifier, None).expect("open");
    let mut operator = ScriptedOperator::accept_all();

    let err = match provision_session(&mut session, &router_script(), &mut operator).await {
        Ok(_) => panic!("unknown prompts should not provision"),
        Err(err) => err,
    };

    assert!(matches!(err, ConsoleError::MaxRetriesExceeded(3)));
    assert!(session.is_closed());
    assert!(device.await.expect("device task").is_empty());
    assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn write_failure_closes_the_console_once() {
    let (device, console) = tokio::io::duplex(4096);
    let (console, shutdowns) = common::CountingStream::new(console);
    let console = console.failing_writes();
    let device = common::spawn_device(device, DeviceScript::banner("Router>\r\n"));
    let mut operator = ScriptedOperator::accept_all();

    let err = match provision(
        console,
        &router_script(),
        &ProvisionConfig::default(),
        &mut operator,
        None,
    )
    .await
    {
        Ok(_) => panic!("write failure should abort"),
        Err(err) => err,
    };

    match err {
        ConsoleError::WriteError { command, .. } => assert_eq!(command, "en"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(device.await.expect("device task").is_empty());
    assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn device_hang_up_is_a_disconnect() {
    let (console, shutdowns, device) = console_pair(DeviceScript::default().hang_up());
    let mut operator = ScriptedOperator::accept_all();

    let err = match provision(
        console,
        &router_script(),
        &ProvisionConfig::default(),
        &mut operator,
        None,
    )
    .await
    {
        Ok(_) => panic!("hung up device should not provision"),
        Err(err) => err,
    };

    assert!(matches!(err, ConsoleError::ChannelDisconnectError));
    assert!(device.await.expect("device task").is_empty());
    assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
}
