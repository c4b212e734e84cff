use std::time::Duration;

use heapless::Vec;
use lorawan_class_c::{
    class::{
        retransmission::{RetransmissionController, Retry},
        timers::{TimerExpiry, TimerHandle, TimerKind, TimerSlot, WindowTimers},
    },
    config::device::{ConfigError, DevAddr, DeviceConfig, SessionState},
    lorawan::{
        commands::{DownlinkCommand, DownlinkCommands, UplinkCommand},
        frame::{self, Frame, FrameError, FrameHeader, MType},
        mac::{MacError, MacParams},
        phy,
        region::{DataRate, Eu868, Region, Us915},
    },
    radio::{symbol_time, TxParams},
};

use mock::{SimScheduler, DEV_ADDR};

type Error = MacError<()>;

fn frame_of(bytes: &[u8]) -> Frame {
    Frame::from_slice(bytes).unwrap()
}

#[test]
fn test_frame_encode_layout() {
    let mut header = FrameHeader::new(DevAddr::new(0x2601_1F2A), 0x0102);
    header.f_ctrl.adr = true;
    header.f_opts = Vec::from_slice(&[0x05, 0x07]).unwrap();

    let bytes = frame::encode(MType::ConfirmedDataUp, &header, Some(3), b"hi").unwrap();
    assert_eq!(
        bytes.as_slice(),
        &[0x80, 0x2A, 0x1F, 0x01, 0x26, 0x82, 0x02, 0x01, 0x05, 0x07, 0x03, b'h', b'i']
    );
}

#[test]
fn test_frame_decode() {
    let bytes = [0x60, 0xFF, 0xFF, 0xFF, 0xFF, 0x21, 0x2A, 0x00, 0x06, 0x0A, 0x01, 0x02];
    let data = frame::decode(&bytes).unwrap();

    assert_eq!(data.mtype, MType::UnconfirmedDataDown);
    assert!(data.header.dev_addr.is_broadcast());
    assert!(data.header.f_ctrl.ack);
    assert_eq!(data.header.f_ctrl.f_opts_len, 1);
    assert_eq!(data.header.f_cnt, 42);
    assert_eq!(data.header.f_opts.as_slice(), &[0x06]);
    assert_eq!(data.f_port, Some(10));
    assert_eq!(data.payload, &[0x01, 0x02]);
}

#[test]
fn test_frame_decode_without_port() {
    let header = FrameHeader::new(DEV_ADDR, 9);
    let bytes = frame::encode(MType::ConfirmedDataDown, &header, None, &[]).unwrap();
    assert_eq!(bytes.len(), 8);

    let data = frame::decode(&bytes).unwrap();
    assert_eq!(data.header.dev_addr, DEV_ADDR);
    assert_eq!(data.f_port, None);
    assert!(data.payload.is_empty());
}

#[test]
fn test_frame_decode_errors() {
    assert_eq!(frame::decode(&[]), Err(FrameError::TooShort));
    assert_eq!(frame::decode(&[0x40, 0x01, 0x02]), Err(FrameError::TooShort));
    // FOptsLen claims more bytes than present
    assert_eq!(
        frame::decode(&[0x40, 1, 2, 3, 4, 0x05, 0, 0, 0x06]),
        Err(FrameError::TooShort)
    );
    assert_eq!(
        frame::decode(&[0x20, 0, 0, 0, 0, 0, 0, 0]),
        Err(FrameError::NotDataFrame(MType::JoinAccept))
    );
}

#[test]
fn test_frame_encode_too_large() {
    let header = FrameHeader::new(DEV_ADDR, 0);
    let payload = [0u8; 250];
    assert_eq!(
        frame::encode(MType::UnconfirmedDataUp, &header, Some(1), &payload),
        Err(FrameError::BufferTooSmall)
    );
}

#[test]
fn test_message_direction() {
    assert!(MType::ConfirmedDataUp.is_uplink());
    assert!(MType::UnconfirmedDataUp.is_uplink());
    assert!(!MType::UnconfirmedDataDown.is_uplink());
    assert!(!MType::ConfirmedDataDown.is_uplink());
    assert_eq!(frame::peek_mtype(&[0xA0]), Ok(MType::ConfirmedDataDown));
}

#[test]
fn test_parse_rx_param_setup_req() {
    // Offset 2, DR3, 869.525 MHz
    let bytes = [0x05, 0x23, 0xD2, 0xAD, 0x84];
    let commands: std::vec::Vec<_> = DownlinkCommands::new(&bytes).collect();
    assert_eq!(
        commands,
        vec![DownlinkCommand::RxParamSetupReq {
            rx1_dr_offset: 2,
            rx2_data_rate: 3,
            frequency: 869_525_000,
        }]
    );

    let mut encoded: Vec<u8, 15> = Vec::new();
    commands[0].write_to(&mut encoded).unwrap();
    assert_eq!(encoded.as_slice(), &bytes);
}

#[test]
fn test_parse_command_sequence() {
    // Unknown identifier 0x42 ends parsing
    let bytes = [0x06, 0x02, 0x14, 0x03, 0x42];
    let commands: std::vec::Vec<_> = DownlinkCommands::new(&bytes).collect();
    assert_eq!(
        commands,
        vec![
            DownlinkCommand::DevStatusReq,
            DownlinkCommand::LinkCheckAns {
                margin: 20,
                gateway_count: 3,
            },
        ]
    );
}

#[test]
fn test_parse_stops_at_unknown_or_truncated_command() {
    assert_eq!(DownlinkCommands::new(&[0x7F, 0x06]).count(), 0);
    assert_eq!(DownlinkCommands::new(&[0x06, 0x05, 0x01]).count(), 1);
    // LinkADRReq carries 4 bytes and is skipped as a whole
    let commands: std::vec::Vec<_> =
        DownlinkCommands::new(&[0x03, 0x51, 0xFF, 0x00, 0x01, 0x06]).collect();
    assert_eq!(
        commands,
        vec![
            DownlinkCommand::Unsupported { cid: 0x03 },
            DownlinkCommand::DevStatusReq
        ]
    );
}

#[test]
fn test_uplink_command_encoding() {
    let mut buffer: Vec<u8, 15> = Vec::new();
    UplinkCommand::RxParamSetupAns {
        rx1_dr_offset_ack: false,
        rx2_data_rate_ack: true,
        channel_ack: true,
    }
    .write_to(&mut buffer)
    .unwrap();
    UplinkCommand::DevStatusAns {
        battery: 254,
        margin: -5,
    }
    .write_to(&mut buffer)
    .unwrap();
    UplinkCommand::LinkCheckReq.write_to(&mut buffer).unwrap();

    assert_eq!(buffer.as_slice(), &[0x05, 0x03, 0x06, 254, 0x3B, 0x02]);
}

#[test]
fn test_eu868_parameters() {
    let region = Eu868::new();
    assert_eq!(
        region.data_rate(0),
        Some(DataRate {
            spreading_factor: 12,
            bandwidth: 125_000
        })
    );
    assert_eq!(region.data_rate(6).map(|dr| dr.bandwidth), Some(250_000));
    assert_eq!(region.data_rate(7), None);
    assert_eq!(region.rx1_data_rate(5, 2), 3);
    assert_eq!(region.rx1_data_rate(1, 5), 0);
    assert_eq!(region.rx2_window(), (869_525_000, 0));
    assert_eq!(region.enabled_channels().count(), 3);

    let mut region = region;
    assert!(region.add_channel(867_100_000, 0, 5));
    assert_eq!(region.enabled_channels().count(), 4);
}

#[test]
fn test_us915_parameters() {
    let mut region = Us915::new();
    assert_eq!(region.enabled_channels().count(), 72);
    assert_eq!(region.data_rate(5), None);
    assert_eq!(region.data_rate(8).map(|dr| dr.spreading_factor), Some(12));
    assert_eq!(region.rx1_data_rate(0, 0), 10);
    assert_eq!(region.rx1_data_rate(4, 0), 13);
    assert_eq!(region.rx1_data_rate(3, 3), 10);
    assert_eq!(region.rx1_data_rate(0, 3), 8);
    assert_eq!(region.rx2_window(), (923_300_000, 8));

    region.set_sub_band(1);
    assert_eq!(region.sub_band(), 1);
    let frequencies: std::vec::Vec<u32> =
        region.enabled_channels().map(|c| c.frequency).collect();
    assert_eq!(frequencies.len(), 9);
    assert_eq!(frequencies[0], 903_900_000);
    assert_eq!(frequencies[8], 904_600_000);
}

#[test]
fn test_symbol_time_and_tx_params() {
    assert_eq!(symbol_time(7, 125_000), Duration::from_nanos(1_024_000));
    assert_eq!(symbol_time(12, 125_000), Duration::from_nanos(32_768_000));
    assert_eq!(symbol_time(7, 0), Duration::ZERO);

    let sf12 = TxParams::uplink(12, 125_000);
    assert!(sf12.low_data_rate_optimize);
    assert_eq!(sf12.modulation.coding_rate, 5);
    assert_eq!(sf12.preamble_symbols, 8);
    assert!(sf12.crc_enabled);
    assert!(!TxParams::uplink(10, 125_000).low_data_rate_optimize);

    let region = Eu868::new();
    let dr0 = region.data_rate(0).unwrap();
    assert_eq!(
        phy::window_duration(8, dr0),
        Duration::from_nanos(262_144_000)
    );
}

#[test]
fn test_device_config() {
    let region = Eu868::new();
    let config = DeviceConfig::new(DEV_ADDR, &region);
    assert_eq!(config.max_transmissions, 1);
    assert_eq!(config.receive_delay1, Duration::from_secs(1));
    assert_eq!(config.receive_delay2, Duration::from_secs(2));
    assert_eq!(config.rx2_frequency, 869_525_000);
    assert_eq!(config.rx2_data_rate, 0);
    assert!(!config.adaptive_data_rate);
    assert!(config.validate(&region).is_ok());

    let bad = config.clone().with_max_transmissions(0);
    assert_eq!(bad.validate(&region), Err(ConfigError::NoTransmissions));
    let bad = config
        .clone()
        .with_receive_delays(Duration::from_secs(2), Duration::from_secs(1));
    assert_eq!(bad.validate(&region), Err(ConfigError::DelayOrder));
    let bad = config
        .clone()
        .with_ack_timeout(Duration::from_secs(3), Duration::from_secs(1));
    assert_eq!(bad.validate(&region), Err(ConfigError::AckTimeoutRange));
    let bad = config
        .clone()
        .with_ack_timeout(Duration::from_millis(500), Duration::from_secs(2));
    assert_eq!(bad.validate(&region), Err(ConfigError::AckTimeoutBeforeWindow1));
    let bad = config.with_data_rate(9);
    assert_eq!(bad.validate(&region), Err(ConfigError::UnknownDataRate(9)));
}

#[test]
fn test_session_counters() {
    let mut session = SessionState::new(DEV_ADDR);
    assert_eq!(session.fcnt_up, 0);
    session.increment_fcnt_up();
    assert_eq!(session.fcnt_up, 1);

    session.fcnt_down = 0x0001_FFF0;
    session.update_fcnt_down(0x0005);
    assert_eq!(session.fcnt_down, 0x0001_0005);
}

#[test]
fn test_timer_rearm_replaces_previous() {
    let mut scheduler = SimScheduler::new();
    let mut timers = WindowTimers::new();

    timers.schedule_close_window2(&mut scheduler, Duration::from_secs(1));
    let first = match timers.slot(TimerKind::CloseRx2) {
        TimerSlot::Armed { handle, fire_at } => {
            assert_eq!(fire_at, Duration::from_secs(1));
            handle
        }
        slot => panic!("unexpected slot {:?}", slot),
    };

    timers.schedule_close_window2(&mut scheduler, Duration::from_secs(5));
    assert_eq!(scheduler.cancelled, vec![first]);
    assert_eq!(scheduler.pending(), 1);
    assert_eq!(timers.fire_time(TimerKind::CloseRx2), Some(Duration::from_secs(5)));

    let stale = TimerExpiry {
        kind: TimerKind::CloseRx2,
        handle: first,
    };
    assert!(!timers.on_expiry(stale));

    let live = scheduler.pop_due(Duration::from_secs(10)).unwrap();
    assert!(timers.on_expiry(live));
    assert_eq!(timers.slot(TimerKind::CloseRx2), TimerSlot::Fired);
    // Delivered twice: the second one is stale
    assert!(!timers.on_expiry(live));
}

#[test]
fn test_timer_cancel_is_noop_unless_armed() {
    let mut scheduler = SimScheduler::new();
    let mut timers = WindowTimers::new();

    timers.cancel(&mut scheduler, TimerKind::CloseRx1);
    assert_eq!(timers.slot(TimerKind::CloseRx1), TimerSlot::Unarmed);
    assert!(scheduler.cancelled.is_empty());

    timers.arm(&mut scheduler, TimerKind::OpenRx1, Duration::from_secs(1));
    timers.schedule_close_window1(&mut scheduler, Duration::from_secs(2));
    assert!(timers.is_window1_pending());
    assert!(!timers.is_window2_pending());

    let expiry = scheduler.pop_due(Duration::from_secs(1)).unwrap();
    assert_eq!(expiry.kind, TimerKind::OpenRx1);
    assert!(timers.on_expiry(expiry));

    timers.cancel_all(&mut scheduler);
    assert_eq!(scheduler.cancelled.len(), 1);
    assert_eq!(timers.slot(TimerKind::OpenRx1), TimerSlot::Fired);
    assert_eq!(timers.slot(TimerKind::CloseRx1), TimerSlot::Cancelled);
    assert!(!timers.any_pending());

    timers.cancel_all(&mut scheduler);
    assert_eq!(scheduler.cancelled.len(), 1);
}

#[test]
fn test_equal_fire_times_keep_arming_order() {
    let mut scheduler = SimScheduler::new();
    let mut timers = WindowTimers::new();
    timers.schedule_close_window2(&mut scheduler, Duration::from_secs(1));
    timers.arm(&mut scheduler, TimerKind::OpenRx1, Duration::from_secs(1));

    let first = scheduler.pop_due(Duration::from_secs(1)).unwrap();
    let second = scheduler.pop_due(Duration::from_secs(1)).unwrap();
    assert_eq!(first.kind, TimerKind::CloseRx2);
    assert_eq!(second.kind, TimerKind::OpenRx1);
    assert_ne!(first.handle, TimerHandle(0));
}

#[test]
fn test_retransmission_resend_then_fail() {
    let mut controller = RetransmissionController::new();
    controller.arm(frame_of(b"one"), 3, Duration::from_secs(4));
    assert!(controller.is_waiting_ack());
    assert_eq!(controller.attempts_left(), 2);
    assert_eq!(controller.transmissions(), 1);

    for retransmission in 1..=2u8 {
        assert_eq!(
            controller.resend_or_fail::<()>(),
            Ok(Retry::Resend { retransmission })
        );
        controller
            .record_retransmission::<()>(frame_of(b"again"))
            .unwrap();
    }
    assert_eq!(controller.attempts_left(), 0);
    assert_eq!(controller.pending_packet(), Some(&b"again"[..]));

    match controller.resend_or_fail::<()>() {
        Ok(Retry::GaveUp(outcome)) => {
            assert_eq!(outcome.transmissions, 3);
            assert!(!outcome.success);
            assert_eq!(outcome.first_attempt, Duration::from_secs(4));
            assert_eq!(outcome.packet.as_slice(), b"again");
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(!controller.is_outstanding());
}

#[test]
fn test_retransmission_misuse() {
    let mut controller = RetransmissionController::new();
    assert_eq!(
        controller.resend_or_fail::<()>(),
        Err(Error::NotWaitingAck)
    );

    controller.arm(frame_of(b"x"), 1, Duration::ZERO);
    assert_eq!(
        controller.record_retransmission::<()>(frame_of(b"x")),
        Err(Error::AttemptsUnderflow)
    );
    assert!(Error::AttemptsUnderflow.is_fatal());

    controller.track_unconfirmed(frame_of(b"y"), Duration::ZERO);
    assert_eq!(
        controller.resend_or_fail::<()>(),
        Err(Error::NotWaitingAck)
    );
}

#[test]
fn test_retransmission_supersede() {
    let mut controller = RetransmissionController::new();
    assert_eq!(controller.supersede(), None);

    controller.arm(frame_of(b"old"), 4, Duration::from_secs(1));
    let outcome = controller.supersede().unwrap();
    assert_eq!(outcome.transmissions, 1);
    assert!(!outcome.success);
    assert_eq!(controller.supersede(), None);

    controller.track_unconfirmed(frame_of(b"plain"), Duration::from_secs(2));
    let outcome = controller.supersede().unwrap();
    assert_eq!(outcome.transmissions, 1);
    assert!(outcome.success);
}

#[test]
fn test_retransmission_declare_success() {
    let mut controller = RetransmissionController::new();
    assert_eq!(controller.declare_success(), None);

    controller.arm(frame_of(b"m"), 2, Duration::ZERO);
    let outcome = controller.declare_success().unwrap();
    assert_eq!(outcome.transmissions, 1);
    assert!(outcome.success);
    assert!(!controller.is_waiting_ack());
}

#[test]
fn test_rx_param_setup_applied_even_when_invalid() {
    let region = Eu868::new();
    let mut params = MacParams::from_config(&DeviceConfig::new(DEV_ADDR, &region));

    let status = params.on_rx_param_setup_req(&region, 7, 0, 869_525_000);
    assert!(!status.offset_ok);
    assert!(status.data_rate_ok);
    assert_eq!(params.rx1_dr_offset, 7);
    assert_eq!(
        params.pending_answers(),
        &[UplinkCommand::RxParamSetupAns {
            rx1_dr_offset_ack: false,
            rx2_data_rate_ack: true,
            channel_ack: true,
        }]
    );
    // Offset saturates at the lowest data rate
    assert_eq!(params.rx1_data_rate(&region), 0);

    let status = params.on_rx_param_setup_req(&region, 1, 12, 868_000_000);
    assert!(status.offset_ok);
    assert!(!status.data_rate_ok);
    assert_eq!(params.rx2_data_rate, 12);
    assert_eq!(params.rx2_frequency, 868_000_000);
    // Unmapped data rate listens at the region default
    assert_eq!(params.rx2_modulation(&region).spreading_factor, 12);

    assert_eq!(params.take_fopts().as_slice(), &[0x05, 0x03, 0x05, 0x05]);
    assert!(params.pending_answers().is_empty());
}

#[test]
fn test_step_data_rate() {
    let region = Eu868::new();
    let config = DeviceConfig::new(DEV_ADDR, &region)
        .with_data_rate(1)
        .with_adaptive_data_rate(true);
    let mut params = MacParams::from_config(&config);
    params.tx_power_dbm = 10;

    // Attempts left after the transmission, out of 3
    assert!(!params.step_data_rate(&region, 1, 3));
    assert!(!params.step_data_rate(&region, 3, 3));
    assert!(params.step_data_rate(&region, 2, 3));
    assert_eq!(params.data_rate, 0);
    assert_eq!(params.tx_power_dbm, 14);
    // Already at the floor
    assert!(!params.step_data_rate(&region, 0, 3));

    let mut fixed = MacParams::from_config(&DeviceConfig::new(DEV_ADDR, &region));
    assert!(!fixed.step_data_rate(&region, 2, 3));
    assert_eq!(fixed.data_rate, 5);
}
