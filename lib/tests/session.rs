use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use ledger_dmk::{
    actions::{GetDeviceStatusFlow, OpenAppFlow, SendCommandInAppFlow},
    apdu::{model::DeviceModelId, prelude::GetAppAndVersion, status::DeviceCondition, Apdu, Command},
    dmk_core::{engine::ActionState, DeviceStatus, Error, TransportError},
    session::{Session, SessionId},
    SessionOptions,
};

mod helpers;
use helpers::*;

const WINDOW: Duration = Duration::from_millis(500);

fn session(dev: &Arc<SimDevice>, refresher_disabled: bool) -> Arc<Session> {
    session_for(dev, DeviceModelId::NanoX, refresher_disabled)
}

fn session_for(
    dev: &Arc<SimDevice>,
    model: DeviceModelId,
    refresher_disabled: bool,
) -> Arc<Session> {
    let opts = SessionOptions {
        polling_interval_ms: 1000,
        reconnect_timeout_ms: WINDOW.as_millis() as u64,
        refresher_disabled,
    };

    let c = connect(dev, opts.reconnect_timeout());
    Session::new("sim", model, c, opts)
}

fn count_get_app(dev: &SimDevice) -> usize {
    let get_app = GetAppAndVersion.apdu().unwrap();
    dev.received().iter().filter(|a| **a == get_app).count()
}

#[tokio::test(start_paused = true)]
async fn initialise_fetches_app() -> anyhow::Result<()> {
    setup();

    let dev = SimDevice::new(sim_os(SimOs::new(&[])));
    let s = session(&dev, true);

    s.initialise().await?;
    tokio::time::sleep(Duration::from_millis(10)).await;

    let state = s.state();
    assert_eq!(state.status, DeviceStatus::Connected);
    assert_eq!(state.device_model, DeviceModelId::NanoX);
    assert!(state.current_app.map(|a| a.is_dashboard()).unwrap_or(false));

    assert_eq!(count_get_app(&dev), 1);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn locked_device() -> anyhow::Result<()> {
    setup();

    let os = SimOs::new(&[]);
    os.lock().unwrap().locked = true;

    let dev = SimDevice::new(sim_os(os.clone()));
    let s = session(&dev, true);

    let r = s.initialise().await;
    assert_eq!(
        r.err().and_then(|e| e.device_condition()),
        Some(DeviceCondition::Locked)
    );

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(s.state().status, DeviceStatus::Locked);

    // Unlocking is observed on the next exchange
    os.lock().unwrap().locked = false;

    s.ping().await?;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(s.state().status, DeviceStatus::Connected);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn refresher_polls_until_closed() -> anyhow::Result<()> {
    setup();

    let dev = SimDevice::new(sim_os(SimOs::new(&[])));
    let s = session(&dev, false);

    s.initialise().await?;

    tokio::time::sleep(Duration::from_millis(3500)).await;
    let n = count_get_app(&dev);
    assert!(n >= 3, "expected at least 3 polls, got {n}");

    s.close().await;
    assert_eq!(s.state().status, DeviceStatus::NotConnected);

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(count_get_app(&dev), n);
    assert!(dev.is_closed());

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn termination_hook() -> anyhow::Result<()> {
    setup();

    let dev = SimDevice::new(sim_os(SimOs::new(&[])));
    let s = session(&dev, true);
    s.initialise().await?;

    let terminated = Arc::new(Mutex::new(None::<SessionId>));
    let t = terminated.clone();
    s.on_terminated(move |id| {
        *t.lock().unwrap() = Some(id);
    });

    dev.lose();
    tokio::time::sleep(WINDOW * 2).await;

    assert_eq!(*terminated.lock().unwrap(), Some(s.id()));
    assert_eq!(s.state().status, DeviceStatus::NotConnected);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn reconnection_keeps_session() -> anyhow::Result<()> {
    setup();

    let dev = SimDevice::new(sim_os(SimOs::new(&[])));
    let s = session(&dev, true);
    s.initialise().await?;

    let terminated = Arc::new(Mutex::new(None::<SessionId>));
    let t = terminated.clone();
    s.on_terminated(move |id| {
        *t.lock().unwrap() = Some(id);
    });

    dev.lose();
    tokio::time::sleep(WINDOW / 2).await;
    dev.reconnect();

    tokio::time::sleep(WINDOW * 2).await;
    assert_eq!(*terminated.lock().unwrap(), None);

    let a = s.send_command(&GetAppAndVersion, None).await?;
    assert!(a.is_dashboard());

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn action_holds_intent_queue() -> anyhow::Result<()> {
    setup();

    let dev = SimDevice::new(sim_os(SimOs::new(&["Echo"])));
    let s = session(&dev, true);
    s.initialise().await?;

    let h = s.execute(OpenAppFlow::new("Echo"));

    // Action holds the queue from its first exchange
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(s.state().status, DeviceStatus::Busy);

    // Queued behind the running action
    let r = s.send_command(&Echo(vec![1, 2]), None).await?;
    assert_eq!(r, vec![1, 2]);

    match h.result().await {
        Ok(ActionState::Completed(a)) => assert_eq!(a.name, "Echo"),
        r => panic!("unexpected action result: {r:?}"),
    }

    // The echo command followed every action exchange
    let received = dev.received();
    assert_eq!(received.len(), 5);
    assert_eq!(received[2].ins, 0xd8);
    assert_eq!(received.last(), Some(&Echo(vec![1, 2]).apdu()?));

    assert_eq!(s.state().status, DeviceStatus::Connected);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn legacy_ping_during_action_keeps_busy() -> anyhow::Result<()> {
    setup();

    // Application command awaits user confirmation
    let mut os = sim_os(SimOs::new(&["Echo"]));
    let dev = SimDevice::new(move |a: &Apdu| match (a.cla, a.ins) {
        (0x80, 0x02) => Reply::Ignore,
        _ => os(a),
    });
    let s = session_for(&dev, DeviceModelId::NanoS, true);
    s.initialise().await?;

    let h = s.execute(SendCommandInAppFlow::new("Echo", Echo(vec![0x01])));

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(s.state().status, DeviceStatus::Busy);

    // Ping queued behind the action times out
    let s1 = s.clone();
    let p = tokio::spawn(async move { s1.ping().await });
    assert!(p.await??.is_none());

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(s.state().status, DeviceStatus::Busy);

    h.cancel();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(s.state().status, DeviceStatus::Connected);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn open_app_switches_apps() -> anyhow::Result<()> {
    setup();

    let os = SimOs::new(&["Echo", "Other"]);
    os.lock().unwrap().current = "Other".to_string();

    let dev = SimDevice::new(sim_os(os.clone()));
    let s = session(&dev, true);
    s.initialise().await?;

    let h = s.execute(OpenAppFlow::new("Echo"));

    match h.result().await {
        Ok(ActionState::Completed(a)) => assert_eq!(a.name, "Echo"),
        r => panic!("unexpected action result: {r:?}"),
    }

    // Running app closed before opening the requested app
    let ins: Vec<_> = dev.received().iter().map(|a| a.ins).collect();
    assert_eq!(ins, vec![0x01, 0x01, 0xa7, 0xd8, 0x01]);

    // Both applications recorded as installed
    let state = s.state();
    assert_eq!(state.installed_apps, vec!["Other".to_string(), "Echo".to_string()]);
    assert_eq!(state.current_app.map(|a| a.name), Some("Echo".to_string()));

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn open_app_already_open() -> anyhow::Result<()> {
    setup();

    let os = SimOs::new(&["Echo"]);
    os.lock().unwrap().current = "Echo".to_string();

    let dev = SimDevice::new(sim_os(os));
    let s = session(&dev, true);
    s.initialise().await?;

    let h = s.execute(OpenAppFlow::new("Echo"));
    assert!(matches!(h.result().await, Ok(ActionState::Completed(_))));

    assert_eq!(count_get_app(&dev), 2);
    assert_eq!(dev.received().len(), 2);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn open_unknown_app() -> anyhow::Result<()> {
    setup();

    let dev = SimDevice::new(sim_os(SimOs::new(&["Echo"])));
    let s = session(&dev, true);
    s.initialise().await?;

    let h = s.execute(OpenAppFlow::new("Missing"));

    match h.result().await {
        Ok(ActionState::Error(e)) => {
            assert_eq!(e.device_condition(), Some(DeviceCondition::UnknownApp))
        }
        r => panic!("unexpected action result: {r:?}"),
    }

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn send_command_in_app() -> anyhow::Result<()> {
    setup();

    let dev = SimDevice::new(sim_os(SimOs::new(&["Echo"])));
    let s = session(&dev, true);
    s.initialise().await?;

    let h = s.execute(SendCommandInAppFlow::new("Echo", Echo(vec![0xab])));

    match h.result().await {
        Ok(ActionState::Completed(r)) => assert_eq!(r, vec![0xab]),
        r => panic!("unexpected action result: {r:?}"),
    }

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn send_command_in_app_open_failure() -> anyhow::Result<()> {
    setup();

    // Device acknowledges the open request then disappears
    let dev = SimDevice::new(|a: &Apdu| match (a.cla, a.ins) {
        (0xb0, 0x01) => Reply::Respond(app_info("BOLOS")),
        (0xe0, 0xd8) => Reply::Unplug(ok(vec![])),
        _ => Reply::Respond(ok(vec![])),
    });
    let s = session(&dev, true);
    s.initialise().await?;

    let h = s.execute(SendCommandInAppFlow::new("Echo", Echo(vec![0xab])));

    match h.result().await {
        Ok(ActionState::Error(e)) => {
            assert_eq!(e, Error::Transport(TransportError::ReconnectionTimedOut));
            assert!(e.is_disconnection());
        }
        r => panic!("unexpected action result: {r:?}"),
    }

    // Command never sent
    assert!(dev.received().iter().all(|a| a.cla != 0x80));

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn device_status_on_dashboard() -> anyhow::Result<()> {
    setup();

    let dev = SimDevice::new(sim_os(SimOs::new(&[])));
    let s = session(&dev, true);
    assert_eq!(s.state().firmware_version, None);

    let h = s.execute(GetDeviceStatusFlow);

    match h.result().await {
        Ok(ActionState::Completed(state)) => {
            let v = state.firmware_version.map(|v| v.se_version);
            assert_eq!(v.as_deref(), Some(SIM_OS_VERSION));
        }
        r => panic!("unexpected action result: {r:?}"),
    }

    // OS version retained in the session state
    let v = s.state().firmware_version.map(|v| v.se_version);
    assert_eq!(v.as_deref(), Some(SIM_OS_VERSION));

    let ins: Vec<_> = dev.received().iter().map(|a| (a.cla, a.ins)).collect();
    assert_eq!(ins, vec![(0xb0, 0x01), (0xe0, 0x01)]);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn device_status() -> anyhow::Result<()> {
    setup();

    let os = SimOs::new(&["Echo"]);
    os.lock().unwrap().current = "Echo".to_string();

    let dev = SimDevice::new(sim_os(os.clone()));
    let s = session(&dev, true);

    let h = s.execute(GetDeviceStatusFlow);

    match h.result().await {
        Ok(ActionState::Completed(state)) => {
            assert_eq!(state.current_app.map(|a| a.name), Some("Echo".to_string()))
        }
        r => panic!("unexpected action result: {r:?}"),
    }

    // Locked devices are reported via the session state
    os.lock().unwrap().locked = true;

    let h = s.execute(GetDeviceStatusFlow);
    assert!(matches!(h.result().await, Ok(ActionState::Error(_))));

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(s.state().status, DeviceStatus::Locked);

    Ok(())
}
