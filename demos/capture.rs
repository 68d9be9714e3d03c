use std::time::Duration;

use stereocam::{CaptureParams, Resolution, VideoCapture};

fn main() -> stereocam::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cam = VideoCapture::open(CaptureParams {
        resolution: Resolution::Hd720,
        fps: 30,
    })?;

    println!("Using device: {}", cam.device_path().display());
    println!("Model       : {:?}", cam.model());
    println!("Format      : {}", cam.format());

    // Grab 10 frames and print their metadata
    let count = 10;

    let mut grabbed = 0;
    while grabbed < count {
        match cam.last_frame(Duration::from_millis(500)) {
            Some(frame) => {
                println!(
                    "frame {:>4}  ts {:>12} ns  {} bytes",
                    frame.frame_id,
                    frame.timestamp_ns,
                    frame.data().len()
                );
                grabbed += 1;
            }
            None => println!("no frame within 500 ms"),
        }
    }

    cam.close();
    Ok(())
}
