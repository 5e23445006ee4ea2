//! Full-stack exchange: two encrypted connections over a deterministic
//! lossy channel, with playout draining the receive window.

use bytes::Bytes;
use ring::rand::SystemRandom;
use tempo::crypto::{Base64Key, Session};
use tempo::playout::{
    Clock, ClockConfig, Cursor, CursorTuning, DiscreteNudge, FrameDecoder, FRAME_DURATION_NS,
};
use tempo::{AudioFrame, Connection, MediaFrame};

const FRAMES: u32 = 1000;
const DATA_DROP_INTERVAL: u64 = 11;
const ACK_DROP_INTERVAL: u64 = 13;
const DRAIN_ROUNDS: u32 = 200;

struct CountingDecoder {
    decoded: u64,
    concealed: u64,
}

impl FrameDecoder<AudioFrame> for CountingDecoder {
    fn decode(&mut self, _frame: &AudioFrame) {
        self.decoded += 1;
    }

    fn decode_missing(&mut self) {
        self.concealed += 1;
    }
}

fn addr(port: u16) -> std::net::SocketAddr {
    format!("127.0.0.1:{port}").parse().unwrap()
}

#[test]
fn thousand_frames_survive_periodic_loss() {
    let rng = SystemRandom::new();
    let uplink = Base64Key::random(&rng).unwrap();
    let downlink = Base64Key::random(&rng).unwrap();

    let client_addr = addr(6001);
    let server_addr = addr(6002);

    let mut client: Connection<AudioFrame> = Connection::new(
        Session::new(&uplink, &downlink),
        1,
        2,
        Some(server_addr),
        false,
    );
    let mut server: Connection<AudioFrame> = Connection::new(
        Session::new(&downlink, &uplink),
        2,
        1,
        Some(client_addr),
        false,
    );

    let mut cursor = Cursor::new(CursorTuning::default());
    let mut clock = Clock::new(ClockConfig::default(), 0);
    let mut decoder = CountingDecoder {
        decoded: 0,
        concealed: 0,
    };
    let mut policy = DiscreteNudge;

    let payload = Bytes::from_static(&[0x42; 24]);
    let mut data_packets = 0u64;
    let mut ack_packets = 0u64;
    let mut finished_at = None;

    for round in 0..FRAMES + DRAIN_ROUNDS {
        let now_ns = u64::from(round) * FRAME_DURATION_NS;

        if round < FRAMES {
            client
                .sender()
                .push_frame(AudioFrame::new(round, payload.clone(), payload.clone()));
        }

        let (wire, dest) = client.send_packet(now_ns).unwrap();
        assert_eq!(dest, server_addr);
        data_packets += 1;
        if data_packets % DATA_DROP_INTERVAL != 0 {
            assert!(server.receive_packet(&wire, client_addr, now_ns));
        }

        let (wire, dest) = server.send_packet(now_ns).unwrap();
        assert_eq!(dest, client_addr);
        ack_packets += 1;
        if ack_packets % ACK_DROP_INTERVAL != 0 {
            assert!(client.receive_packet(&wire, server_addr, now_ns));
        }

        // receive progress feeds the peer clock
        let samples_received = u64::from(server.frames().next_frame_needed())
            * u64::from(AudioFrame::SAMPLES_PER_FRAME);
        clock.new_sample(now_ns * 48 / 1_000_000, samples_received);

        cursor.tick(server.frames(), now_ns, &mut decoder, &mut policy);
        let safe = cursor.ok_to_pop(server.frames());
        if safe > 0 {
            server.pop_frames(safe).unwrap();
        }

        if round >= FRAMES {
            let (outstanding, _) = client.sender().outstanding_counts();
            if outstanding == 0 && finished_at.is_none() {
                finished_at = Some(round);
                break;
            }
        }
    }

    // every frame was delivered in order
    assert_eq!(server.frames().next_frame_needed(), FRAMES);

    // and the sender's debt fully cleared within the drain budget
    let (outstanding, in_flight) = client.sender().outstanding_counts();
    assert_eq!(outstanding, 0, "frames never acknowledged");
    assert_eq!(in_flight, 0);
    assert!(finished_at.is_some(), "drain budget exhausted");

    // loss was real and was repaired, not ignored
    let client_stats = client.stats();
    assert!(client_stats.sender.packet_losses_detected > 0);
    assert_eq!(client_stats.decryption_failures, 0);
    assert_eq!(server.stats().decryption_failures, 0);

    // playout consumed the stream
    assert!(decoder.decoded > 0);
    assert!(server.stats().receiver.popped > 0);
    assert!(clock.synced());
}
