// SPDX-FileCopyrightText: Copyright (c) 2023-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bare PDU framing: no address, no checksum, no terminator

mod common;

use common::{completion, pump, SimTransport};
use modbus_engine::{frame::response_data, Config, Endpoint, Frame, Modbus};

fn pdu_config(payload_buffer: &mut [u8]) -> Config<'_> {
    Config {
        payload_buffer,
        rx_timeout: 100,
        tx_timeout: 100,
        ascii: false,
        pdu: true,
    }
}

fn run_until_idle(engine: &mut Modbus<'_, SimTransport>, line: &SimTransport, max_steps: usize) {
    for _ in 0..max_steps {
        if !engine.busy() {
            return;
        }
        line.advance(1);
        engine.step();
    }
    assert!(!engine.busy(), "engine never settled");
}

#[test]
fn encode_request_without_address_and_checksum() {
    let line = SimTransport::new();
    let mut payload = [0u8; 64];
    let mut client = Modbus::new(line.clone(), pdu_config(&mut payload)).unwrap();

    let (_, callback) = completion();
    client
        .request(Frame::read_holding_registers(0x11, 0x006B, 3), &[], callback)
        .unwrap();
    line.advance(1);
    client.step();

    assert_eq!(line.take_tx(), [0x03, 0x00, 0x6B, 0x00, 0x03]);
}

#[test]
fn decode_response_without_address_and_checksum() {
    let line = SimTransport::new();
    let mut payload = [0u8; 64];
    let mut client = Modbus::new(line.clone(), pdu_config(&mut payload)).unwrap();

    let (slot, callback) = completion();
    client
        .request(Frame::read_holding_registers(0x11, 0x006B, 3), &[], callback)
        .unwrap();
    line.advance(1);
    client.step();
    line.take_tx();

    line.push_rx(&[0x03, 0x06, 0x02, 0x2B, 0x00, 0x00, 0x00, 0x64]);
    run_until_idle(&mut client, &line, 10);

    let (frame, data) = slot.borrow_mut().take().expect("no completion");
    // The address never travels on a PDU line.
    assert_eq!(frame.address, 0x11);
    assert_eq!(frame.length_code, 6);
    let registers: Vec<_> = response_data(&frame, &data).registers().collect();
    assert_eq!(registers, vec![0x022B, 0x0000, 0x0064]);
}

#[test]
fn pdu_servers_always_respond() {
    // Without an address on the wire there are no broadcasts, so a
    // PDU server must answer even though its frame address is zero.
    let client_line = SimTransport::new();
    let server_line = SimTransport::new();
    let mut client_buf = [0u8; 64];
    let mut server_buf = [0u8; 64];
    let mut client = Modbus::new(client_line.clone(), pdu_config(&mut client_buf)).unwrap();
    let mut server = Modbus::new(server_line.clone(), pdu_config(&mut server_buf)).unwrap();

    server.link_endpoints(vec![Endpoint::catch_all().handler(0x04, |frame, data| {
        data[..2].copy_from_slice(&[0x12, 0x34]);
        frame.length_code = 2;
    })]);

    let (slot, callback) = completion();
    client
        .request(Frame::read_input_registers(0x00, 0x0008, 1), &[], callback)
        .unwrap();
    for _ in 0..500 {
        if !client.busy() {
            break;
        }
        client_line.advance(1);
        server_line.advance(1);
        client.step();
        pump(&client_line, &server_line);
        server.step();
        pump(&server_line, &client_line);
    }

    let (frame, data) = slot.borrow_mut().take().expect("no completion");
    assert_eq!(frame.function, 0x04);
    assert_eq!(data, [0x12, 0x34]);
}
