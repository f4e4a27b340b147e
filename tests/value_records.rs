use msp_tool::msp::value::{decode_until_exhausted, encode_to_vec};
use msp_tool::msp::{Frame, MspDecode};
use msp_tool::msp_record;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotorOutput {
    index: u8,
    throttle: u16,
    flags: u32,
}

msp_record!(MotorOutput {
    index,
    throttle,
    flags,
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Attitude {
    roll: u16,
    pitch: u16,
    yaw: u16,
}

msp_record!(Attitude { roll, pitch, yaw });

#[test]
fn record_declared_outside_the_crate() {
    let motor = MotorOutput {
        index: 2,
        throttle: 1500,
        flags: 0x0100_0001,
    };
    let bytes = encode_to_vec(&motor);
    assert_eq!(bytes, vec![2, 0xdc, 0x05, 0x01, 0x00, 0x00, 0x01]);
    let mut frame = Frame::new(0, bytes);
    assert_eq!(MotorOutput::decode(&mut frame).unwrap(), motor);
}

#[test]
fn fixed_array_of_records() {
    let attitudes = [
        Attitude { roll: 1, pitch: 2, yaw: 3 },
        Attitude { roll: 400, pitch: 500, yaw: 600 },
    ];
    let mut frame = Frame::new(108, encode_to_vec(&attitudes));
    assert_eq!(frame.len(), 12);
    let back: [Attitude; 2] = frame.read().unwrap();
    assert_eq!(back, attitudes);

    let err = frame.read::<Attitude>().unwrap_err();
    assert!(err.is_exhausted());
}

#[test]
fn record_lists_end_at_payload_exhaustion() {
    let motors = vec![
        MotorOutput { index: 0, throttle: 1000, flags: 0 },
        MotorOutput { index: 1, throttle: 1100, flags: 1 },
        MotorOutput { index: 2, throttle: 1200, flags: 2 },
    ];
    let mut payload = encode_to_vec(&motors);
    // a torn trailing record is not an error
    payload.extend_from_slice(&[3, 0x10]);
    let mut frame = Frame::new(0, payload);
    let decoded: Vec<MotorOutput> = decode_until_exhausted(&mut frame).unwrap();
    assert_eq!(decoded, motors);
}
