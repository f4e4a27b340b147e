use std::io;
use std::sync::Arc;
use std::time::Duration;

use msp_tool::fc::{FlightController, LinkState};
use msp_tool::msp::{MSP_API_VERSION, MSP_RX_MAP};
use msp_tool::transport::scripted::{ScriptedConnector, Step};

mod common;
use common::{board_frame, fast_options, identification_requests, next_notice, PORT};

#[tokio::test]
async fn closed_link_reconnects_and_reidentifies() {
    let connector = ScriptedConnector::new();
    connector.push_session(vec![
        Step::Data(board_frame(MSP_API_VERSION, &[0, 1, 40])),
        Step::Fail(io::ErrorKind::NotConnected),
    ]);
    connector.push_session(vec![Step::Data(board_frame(MSP_API_VERSION, &[0, 1, 41]))]);

    let (fc, mut notices) =
        FlightController::connect(fast_options(true), Arc::new(connector.clone())).unwrap();
    assert_eq!(connector.writes(0), identification_requests());

    let runner = {
        let fc = Arc::clone(&fc);
        tokio::spawn(async move { fc.run().await })
    };

    assert_eq!(next_notice(&mut notices).await, "MSP API version 1.40 (protocol 0)");
    assert_eq!(
        next_notice(&mut notices).await,
        "Board disconnected (scripted failure), trying to reconnect..."
    );
    assert_eq!(
        next_notice(&mut notices).await,
        format!("Reconnected to {} @ 115200bps", PORT)
    );
    assert_eq!(connector.open_count(), 2);
    assert_eq!(connector.writes(1), identification_requests());

    // Dispatch carries on over the new handle.
    assert_eq!(next_notice(&mut notices).await, "MSP API version 1.41 (protocol 0)");
    assert_eq!(fc.link_state(), LinkState::Connected);

    fc.shutdown();
    runner.await.unwrap().unwrap();
}

#[tokio::test]
async fn waits_for_unplugged_board_to_return() {
    let connector = ScriptedConnector::new();
    connector.push_session(vec![Step::Fail(io::ErrorKind::BrokenPipe)]);
    connector.push_session(vec![]);
    connector.set_present(false);

    let (fc, mut notices) =
        FlightController::connect(fast_options(true), Arc::new(connector.clone())).unwrap();
    let runner = {
        let fc = Arc::clone(&fc);
        tokio::spawn(async move { fc.run().await })
    };

    assert_eq!(
        next_notice(&mut notices).await,
        "Board disconnected (scripted failure), trying to reconnect..."
    );
    tokio::time::sleep(Duration::from_millis(15)).await;
    // Never opened while the device node is missing.
    assert_eq!(connector.open_count(), 1);
    assert_eq!(fc.link_state(), LinkState::Connecting);

    connector.set_present(true);
    assert_eq!(
        next_notice(&mut notices).await,
        format!("Reconnected to {} @ 115200bps", PORT)
    );
    assert_eq!(connector.open_count(), 2);

    fc.shutdown();
    runner.await.unwrap().unwrap();
}

#[tokio::test]
async fn transient_open_failures_are_retried() {
    let connector = ScriptedConnector::new();
    connector.push_session(vec![Step::Fail(io::ErrorKind::BrokenPipe)]);
    connector.push_session(vec![]);

    let (fc, mut notices) =
        FlightController::connect(fast_options(false), Arc::new(connector.clone())).unwrap();
    connector.fail_next_opens(5);
    let runner = {
        let fc = Arc::clone(&fc);
        tokio::spawn(async move { fc.run().await })
    };

    next_notice(&mut notices).await;
    assert_eq!(
        next_notice(&mut notices).await,
        format!("Reconnected to {} @ 115200bps", PORT)
    );
    assert_eq!(connector.writes(1), identification_requests());

    fc.shutdown();
    runner.await.unwrap().unwrap();
}

#[tokio::test]
async fn reconnect_stops_rc_simulation_and_forgets_channel_map() {
    let connector = ScriptedConnector::new();
    connector.push_session(vec![
        Step::Data(board_frame(MSP_RX_MAP, &[0, 1, 3, 2, 4, 5, 6, 7])),
        Step::Fail(io::ErrorKind::BrokenPipe),
    ]);
    connector.push_session(vec![]);

    let (fc, mut notices) =
        FlightController::connect(fast_options(false), Arc::new(connector.clone())).unwrap();
    assert!(fc.toggle_rx_simulation());
    let runner = {
        let fc = Arc::clone(&fc);
        tokio::spawn(async move { fc.run().await })
    };

    next_notice(&mut notices).await;
    assert_eq!(
        next_notice(&mut notices).await,
        format!("Reconnected to {} @ 115200bps", PORT)
    );
    assert!(!fc.is_simulating_rx());
    assert_eq!(fc.identity().channel_map, None);

    fc.shutdown();
    runner.await.unwrap().unwrap();
}

#[tokio::test]
async fn board_state_is_dropped_before_the_port_returns() {
    let connector = ScriptedConnector::new();
    connector.push_session(vec![
        Step::Data(board_frame(MSP_RX_MAP, &[0, 1, 3, 2, 4, 5, 6, 7])),
        Step::Fail(io::ErrorKind::BrokenPipe),
    ]);
    connector.push_session(vec![]);

    let (fc, mut notices) =
        FlightController::connect(fast_options(true), Arc::new(connector.clone())).unwrap();
    assert!(fc.toggle_rx_simulation());
    connector.set_present(false);
    let runner = {
        let fc = Arc::clone(&fc);
        tokio::spawn(async move { fc.run().await })
    };
    next_notice(&mut notices).await;

    // Still waiting for the device node, yet nothing from the old board is left.
    assert_eq!(fc.link_state(), LinkState::Connecting);
    assert!(!fc.is_simulating_rx());
    assert_eq!(fc.identity().channel_map, None);

    connector.set_present(true);
    assert_eq!(
        next_notice(&mut notices).await,
        format!("Reconnected to {} @ 115200bps", PORT)
    );
    // The new handle only ever sees the identification requests.
    assert_eq!(connector.writes(1), identification_requests());

    fc.shutdown();
    runner.await.unwrap().unwrap();
}
