//! Consumers of the per-tick pipeline results: greyscale frames and point
//! arrays fan out to local subscribers, and an optional tracking sink runs a
//! tracker over the contact stream.

use std::path::PathBuf;

use log::{error, info};

use crate::buffer::{Frame, PointArray};
use crate::stream_server::{SeqPacketServer, StreamError};
use crate::tracker::{Tracker, TrackedPoint};

pub trait FrameSink {
    fn emit_frame(&mut self, frame: &Frame);
}

pub trait PointSink {
    fn emit_points(&mut self, points: &PointArray);
}

/// `{u32 width, u32 height, u8 data[width*height]}`, little-endian.
pub fn encode_frame_packet(frame: &Frame, packet: &mut Vec<u8>) {
    packet.clear();
    packet.reserve(8 + frame.data().len());
    packet.extend_from_slice(&frame.width().to_le_bytes());
    packet.extend_from_slice(&frame.height().to_le_bytes());
    packet.extend_from_slice(frame.data());
}

/// `{u32 count, {f32 x, f32 y}[count]}`, little-endian.
pub fn encode_point_packet(points: &PointArray, packet: &mut Vec<u8>) {
    packet.clear();
    packet.reserve(4 + points.len() * 8);
    packet.extend_from_slice(&(points.len() as u32).to_le_bytes());
    for point in points {
        packet.extend_from_slice(&point.x.to_le_bytes());
        packet.extend_from_slice(&point.y.to_le_bytes());
    }
}

/// Fans captured frames out over a local sequenced-packet socket.
pub struct SocketFrameSink {
    server: SeqPacketServer,
    packet: Vec<u8>,
}

impl SocketFrameSink {
    pub fn bind(path: PathBuf) -> Result<Self, StreamError> {
        Ok(SocketFrameSink {
            server: SeqPacketServer::bind(path)?,
            packet: Vec::new(),
        })
    }
}

impl FrameSink for SocketFrameSink {
    fn emit_frame(&mut self, frame: &Frame) {
        eprintln!("DEBUG emit_frame called, empty={}", frame.is_empty());
        if frame.is_empty() {
            return;
        }
        encode_frame_packet(frame, &mut self.packet);
        eprintln!("DEBUG sending packet len={}", self.packet.len());
        if let Err(e) = self.server.emit(&self.packet) {
            error!(
                "frame stream \"{}\": {e}",
                self.server.path().display()
            );
        }
    }
}

/// Fans detected point arrays out over a local sequenced-packet socket.
pub struct SocketPointSink {
    server: SeqPacketServer,
    packet: Vec<u8>,
}

impl SocketPointSink {
    pub fn bind(path: PathBuf) -> Result<Self, StreamError> {
        Ok(SocketPointSink {
            server: SeqPacketServer::bind(path)?,
            packet: Vec::new(),
        })
    }
}

impl PointSink for SocketPointSink {
    fn emit_points(&mut self, points: &PointArray) {
        encode_point_packet(points, &mut self.packet);
        if let Err(e) = self.server.emit(&self.packet) {
            error!(
                "point stream \"{}\": {e}",
                self.server.path().display()
            );
        }
    }
}

/// Runs a tracker over the contact stream and logs touch-down, move and
/// touch-up transitions as JSON lines.
pub struct TrackingSink {
    tracker: Box<dyn Tracker>,
}

impl TrackingSink {
    pub fn new(tracker: Box<dyn Tracker>) -> Self {
        TrackingSink { tracker }
    }
}

impl PointSink for TrackingSink {
    fn emit_points(&mut self, points: &PointArray) {
        let output = self.tracker.assign_ids(points);

        for (current_idx, &matched) in output.current_to_previous.iter().enumerate() {
            if matched < 0 && output.current_ids[current_idx] >= 0 {
                info!("touch down: id {}", output.current_ids[current_idx]);
            }
        }
        for &successor in &output.previous_to_current {
            if successor < 0 {
                info!("touch up");
            }
        }

        let tracked: Vec<TrackedPoint> = points
            .iter()
            .zip(&output.current_ids)
            .filter(|(_, &id)| id >= 0)
            .map(|(p, &id)| TrackedPoint {
                id,
                x: p.x,
                y: p.y,
            })
            .collect();
        match serde_json::to_string(&tracked) {
            Ok(line) => info!("tracked: {line}"),
            Err(e) => error!("could not serialize tracked points: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Point;

    #[test]
    fn frame_packet_layout() {
        let mut frame = Frame::new();
        frame.resize(2, 2);
        frame.set(0, 0, 1);
        frame.set(1, 1, 4);
        let mut packet = Vec::new();
        encode_frame_packet(&frame, &mut packet);
        assert_eq!(packet.len(), 8 + 4);
        assert_eq!(&packet[0..4], &2u32.to_le_bytes());
        assert_eq!(&packet[4..8], &2u32.to_le_bytes());
        assert_eq!(&packet[8..], &[1, 0, 0, 4]);
    }

    #[test]
    fn point_packet_layout() {
        let points = vec![Point::new(0.25, 0.5), Point::new(0.75, 0.5)];
        let mut packet = Vec::new();
        encode_point_packet(&points, &mut packet);
        assert_eq!(packet.len(), 4 + 2 * 8);
        assert_eq!(&packet[0..4], &2u32.to_le_bytes());
        assert_eq!(&packet[4..8], &0.25f32.to_le_bytes());
        assert_eq!(&packet[8..12], &0.5f32.to_le_bytes());
        assert_eq!(&packet[12..16], &0.75f32.to_le_bytes());
        assert_eq!(&packet[16..20], &0.5f32.to_le_bytes());
    }

    #[test]
    fn empty_point_packet_is_just_the_header() {
        let mut packet = Vec::new();
        encode_point_packet(&PointArray::new(), &mut packet);
        assert_eq!(packet, 0u32.to_le_bytes());
    }
}
