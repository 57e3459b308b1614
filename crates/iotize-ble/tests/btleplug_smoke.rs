#[cfg(feature = "btleplug")]
#[tokio::test]
async fn btleplug_link_smoke() {
    use iotize_ble::btleplug_backend::{BtleplugLink, BtleplugLinkConfig};
    use iotize_ble::{Session, SessionConfig};

    if std::env::var("IOTIZE_BLE_E2E").ok().as_deref() != Some("1") {
        eprintln!("set IOTIZE_BLE_E2E=1 and IOTIZE_BLE_TARGET to run btleplug smoke test");
        return;
    }
    let Ok(target) = std::env::var("IOTIZE_BLE_TARGET") else {
        eprintln!("IOTIZE_BLE_TARGET must name the device (local name or address)");
        return;
    };

    let link = BtleplugLink::find(&target, BtleplugLinkConfig::default())
        .await
        .expect("device should be discoverable");
    let mut session = Session::new(link, SessionConfig::default()).expect("valid config");
    session.connect().await.expect("device should connect");
    assert!(session.is_ready());
    session.disconnect().await.expect("disconnect");
}

#[cfg(not(feature = "btleplug"))]
#[test]
fn btleplug_link_smoke() {
    eprintln!("enable feature iotize-ble/btleplug to run this test");
}
