//! Play a tone through a filter sweep, then fade out
//!
//! Run with: cargo run --example tone --features cpal_sink
//!
//! Lists available devices and plays on the default one.

use std::thread::sleep;
use std::time::Duration;

use klangraum::{AudioEvent, CpalDevice, NodeParam, SoundSystem, SystemConfig, WaveType};

fn main() {
    tracing_subscriber::fmt::init();

    println!("Available audio output devices:");
    for (i, device) in CpalDevice::list_outputs().iter().enumerate() {
        println!(
            "  [{}] {} ({}Hz, {} ch)",
            i,
            device.name(),
            device.sample_rate(),
            device.channels()
        );
    }

    let Some(device) = CpalDevice::default_output() else {
        eprintln!("No audio output devices found!");
        return;
    };
    println!("\nUsing: {} @ {}Hz", device.name(), device.sample_rate());

    let (mut system, engine) = SoundSystem::new(SystemConfig {
        sample_rate: device.sample_rate(),
        device_channels: device.channels() as usize,
        ..SystemConfig::default()
    });
    // without a stream the engine is driven here, rendering into nothing
    let mut stream = match device.open(engine) {
        Ok(stream) => Some(stream),
        Err(failed) => {
            eprintln!("{failed}, continuing without sound");
            if let Some(engine) = failed.engine {
                system.attach_engine(engine).expect("own engine");
            }
            None
        }
    };
    let mut silent = vec![0.0f32; 800 * device.channels() as usize];

    let saw = system
        .create_generated_wave_node("saw", WaveType::Saw, 110.0)
        .expect("saw");
    let filter = system.create_low_pass_node("sweep", 200.0).expect("filter");
    let reverb = system.create_reverb_node("room").expect("reverb");
    system.connect(saw, filter).expect("connect");
    system.connect(filter, reverb).expect("connect");
    system.connect(reverb, system.output_node()).expect("connect");

    // sweep the cutoff up over three seconds
    for step in 0..180 {
        let cutoff = 200.0 * 2f32.powf(step as f32 / 36.0);
        system
            .set_node_param(filter, NodeParam::Cutoff(cutoff))
            .expect("param");
        let _ = system.render(&mut silent, device.channels() as usize);
        system.update(1.0 / 60.0);
        for event in system.take_events() {
            if let (AudioEvent::LatencyChanged(_), Some(stream)) = (event, stream.as_mut()) {
                let _ = stream.sync_latency();
            }
        }
        sleep(Duration::from_millis(16));
    }

    let fade = system.fade_volume(0.0, 1.0);
    while fade.is_running() {
        let _ = system.render(&mut silent, device.channels() as usize);
        system.update(1.0 / 60.0);
        sleep(Duration::from_millis(16));
    }
    println!("peak level at the end: {:.3}", system.peak_output_level());
}
