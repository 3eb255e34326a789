use criterion::{black_box, criterion_group, criterion_main, Criterion};
use klangraum::{SoundSystem, SystemConfig, ThreadingMode, WaveType};

fn system() -> SoundSystem {
    SoundSystem::with_engine(SystemConfig {
        threading: ThreadingMode::SingleThreaded,
        ..SystemConfig::default()
    })
}

pub fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("render 256 frames, 8 tones", |b| {
        let mut system = system();
        let output = system.output_node();
        for i in 0..8 {
            let tone = system
                .create_generated_wave_node("tone", WaveType::Saw, 110.0 * (i + 1) as f32)
                .unwrap();
            system.connect(tone, output).unwrap();
        }
        system.set_volume(0.1);
        let mut out = vec![0.0f32; 512];

        b.iter(|| system.render(black_box(&mut out), 2).unwrap())
    });

    c.bench_function("render 256 frames, effect chain", |b| {
        let mut system = system();
        let tone = system
            .create_generated_wave_node("tone", WaveType::Square, 220.0)
            .unwrap();
        let filter = system.create_low_pass_node("lp", 2000.0).unwrap();
        let eq = system.create_equalizer_node("eq").unwrap();
        let comp = system.create_compressor_node("comp").unwrap();
        let delay = system.create_delay_node("delay", 0.25).unwrap();
        let reverb = system.create_reverb_node("reverb").unwrap();
        let chain = [tone, filter, eq, comp, delay, reverb, system.output_node()];
        for pair in chain.windows(2) {
            system.connect(pair[0], pair[1]).unwrap();
        }
        let mut out = vec![0.0f32; 512];

        b.iter(|| system.render(black_box(&mut out), 2).unwrap())
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
