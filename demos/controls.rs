use stereocam::{control, CaptureParams, VideoCapture};

fn main() -> stereocam::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cam = VideoCapture::open(CaptureParams::default())?;
    println!("Using device: {}", cam.device_path().display());

    let named = [
        ("brightness", control::BRIGHTNESS),
        ("contrast", control::CONTRAST),
        ("saturation", control::SATURATION),
        ("hue", control::HUE),
        ("sharpness", control::SHARPNESS),
        ("gamma", control::GAMMA),
        ("gain", control::GAIN),
        ("white balance", control::WHITE_BALANCE_TEMPERATURE),
    ];

    for (name, id) in named {
        match (cam.query_control(id), cam.control(id)) {
            (Some(desc), Some(value)) => println!(
                "{:<14} {:>6}  [{}..{}] step {} default {}",
                name, value, desc.minimum, desc.maximum, desc.step, desc.default
            ),
            _ => println!("{:<14} unavailable", name),
        }
    }

    // Nudge the brightness, then restore the default
    if let Some(value) = cam.brightness() {
        cam.set_brightness(value + 1);
        println!("brightness now {:?}", cam.brightness());
        cam.reset_brightness();
        println!("brightness reset to {:?}", cam.brightness());
    }

    cam.close();
    Ok(())
}
