use std::thread;
use std::time::Duration;

use stereocam::{CaptureParams, VideoCapture};

fn main() -> stereocam::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cam = VideoCapture::open(CaptureParams::default())?;
    println!("Using device: {}", cam.device_path().display());

    println!("LED is {}", if cam.led()? { "on" } else { "off" });

    // Blink a few times, then leave the LED where we found it
    for _ in 0..6 {
        let lit = cam.toggle_led()?;
        println!("LED toggled {}", if lit { "on" } else { "off" });
        thread::sleep(Duration::from_millis(500));
    }

    cam.close();
    Ok(())
}
