//! PointIR turns a camera feed of a projected surface into a stream of
//! multi-touch contact points: bright blobs are detected, unprojected
//! through a calibrated homography into normalized surface coordinates,
//! tracked across frames and fanned out to local subscribers.

pub mod buffer;
pub mod calibration_store;
pub mod capture;
pub mod chessboard;
pub mod controller;
pub mod daemon_config;
pub mod detector;
pub mod filter;
pub mod homography;
pub mod processor;
pub mod registry;
pub mod sinks;
pub mod stream_server;
pub mod tracker;
pub mod unprojector;
