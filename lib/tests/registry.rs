use std::{sync::Arc, time::Duration};

use futures::StreamExt;

use ledger_dmk::{
    apdu::model::DeviceModelId,
    session::{Session, SessionRegistry},
    ConnectionState, Error, SessionOptions,
};

mod helpers;
use helpers::*;

fn session(device_id: &str) -> (Arc<SimDevice>, Arc<Session>) {
    let dev = SimDevice::new(sim_os(SimOs::new(&[])));
    let opts = SessionOptions::default();

    let c = connect(&dev, opts.reconnect_timeout());
    let s = Session::new(device_id, DeviceModelId::NanoSP, c, opts);

    (dev, s)
}

#[tokio::test]
async fn add_and_lookup() -> anyhow::Result<()> {
    setup();

    let r = SessionRegistry::new();

    let (_d1, s1) = session("usb:1");
    let (_d2, s2) = session("usb:1");
    let (_d3, s3) = session("tcp:127.0.0.1:9999");

    r.add_session(s1.clone());
    r.add_session(s2.clone());
    r.add_session(s3.clone());

    // Duplicate registration is ignored
    r.add_session(s1.clone());
    assert_eq!(r.list().len(), 3);

    assert_eq!(r.get_session_by_id(s3.id())?.id(), s3.id());

    let mut ids: Vec<_> = r
        .get_sessions_by_device_id("usb:1")?
        .iter()
        .map(|s| s.id())
        .collect();
    ids.sort();

    let mut expected = vec![s1.id(), s2.id()];
    expected.sort();
    assert_eq!(ids, expected);

    assert!(matches!(
        r.get_sessions_by_device_id("usb:2"),
        Err(Error::DeviceNotFound(_))
    ));

    Ok(())
}

#[tokio::test]
async fn remove_session() -> anyhow::Result<()> {
    setup();

    let r = SessionRegistry::new();

    let (dev, s) = session("usb:1");
    r.add_session(s.clone());

    // Unknown sessions are ignored
    r.remove_session(uuid::Uuid::new_v4()).await;
    assert_eq!(r.list().len(), 1);

    r.remove_session(s.id()).await;

    assert!(matches!(
        r.get_session_by_id(s.id()),
        Err(Error::SessionNotFound(id)) if id == s.id()
    ));
    assert_eq!(s.connection().state(), ConnectionState::Terminated);
    assert!(dev.is_closed());

    // Removing twice is a no-op
    r.remove_session(s.id()).await;

    Ok(())
}

#[tokio::test]
async fn removed_session_dropped() -> anyhow::Result<()> {
    setup();

    let r = SessionRegistry::new();

    let (_d1, s1) = session("usb:1");
    let (_d2, s2) = session("usb:2");
    let (id1, id2) = (s1.id(), s2.id());
    let weak = Arc::downgrade(&s1);

    r.add_session(s1);
    r.add_session(s2.clone());

    let early = r.sessions();

    r.remove_session(id1).await;

    // Released by the registry and its subscribers
    assert!(weak.upgrade().is_none());

    let late = r.sessions();

    r.close().await;

    // Dropped sessions are skipped on replay, sessions still held are not
    let ids: Vec<_> = early.map(|s| s.id()).collect().await;
    assert_eq!(ids, vec![id2]);

    let ids: Vec<_> = late.map(|s| s.id()).collect().await;
    assert_eq!(ids, vec![id2]);

    Ok(())
}

#[tokio::test]
async fn sessions_replayed_to_late_subscribers() -> anyhow::Result<()> {
    setup();

    let r = SessionRegistry::new();

    let (_d1, s1) = session("usb:1");
    let (_d2, s2) = session("usb:2");
    let (_d3, s3) = session("usb:3");

    r.add_session(s1.clone());
    r.add_session(s2.clone());

    let early = r.sessions();

    r.add_session(s3.clone());

    let late = r.sessions();

    r.close().await;
    assert!(r.list().is_empty());

    let expected = vec![s1.id(), s2.id(), s3.id()];

    // Both subscribers observe every session in insertion order
    let ids: Vec<_> = early.map(|s| s.id()).collect().await;
    assert_eq!(ids, expected);

    let ids: Vec<_> = late.map(|s| s.id()).collect().await;
    assert_eq!(ids, expected);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn terminated_sessions_removed() -> anyhow::Result<()> {
    setup();

    let r = Arc::new(SessionRegistry::new());

    let (dev, s) = session("usb:1");
    r.add_session(s.clone());

    let weak = Arc::downgrade(&r);
    s.on_terminated(move |id| {
        if let Some(r) = weak.upgrade() {
            tokio::spawn(async move { r.remove_session(id).await });
        }
    });

    dev.lose();
    tokio::time::sleep(s.options().reconnect_timeout() + Duration::from_millis(100)).await;

    assert!(r.list().is_empty());

    Ok(())
}
