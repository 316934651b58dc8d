use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rp1_io::{
    rp1::pwm::derive_range_duty,
    sensors::dht11::{decode_high_times, pack_bits, FRAME_BITS},
    PulseGenerator, PwmConfig, RegisterWindow, Rp1Pins,
};
use std::rc::Rc;

fn frame_high_times(bytes: [u8; 5]) -> [u64; FRAME_BITS] {
    let mut high_us = [0u64; FRAME_BITS];
    for (i, high) in high_us.iter_mut().enumerate() {
        let bit = (bytes[i / 8] >> (7 - i % 8)) & 1;
        *high = if bit == 1 { 70 } else { 26 };
    }
    high_us
}

/// Benchmark DHT11 frame decoding
fn bench_dht11_decode(c: &mut Criterion) {
    let high_us = frame_high_times([55, 0, 24, 0, 79]);

    c.bench_function("dht11_decode_high_times", |b| {
        b.iter(|| decode_high_times(black_box(&high_us), 50).expect("Frame should decode"))
    });

    let bits = high_us.map(|us| us > 50);
    c.bench_function("dht11_pack_bits", |b| b.iter(|| pack_bits(black_box(&bits))));
}

/// Benchmark PWM range/duty derivation across frequencies
fn bench_pwm_derivation(c: &mut Criterion) {
    let mut group = c.benchmark_group("pwm_derive_range_duty");
    for freq in [50u32, 1_000, 25_000, 1_000_000] {
        group.bench_with_input(BenchmarkId::from_parameter(freq), &freq, |b, &freq| {
            b.iter(|| derive_range_duty(50_000_000, 1, black_box(freq), 50))
        });
    }
    group.finish();
}

/// Benchmark register programming against a heap-backed window
fn bench_pwm_registers(c: &mut Criterion) {
    let window = Rc::new(RegisterWindow::in_memory(0x10_0000));
    let pins = Rp1Pins::new(Rc::clone(&window), PulseGenerator::default());
    let pwm = pins.pwm(PwmConfig::default()).expect("Should create PWM engine");
    pwm.set_clock(1, 0).expect("Should set clock");

    c.bench_function("pwm_set_frequency_duty", |b| {
        b.iter(|| pwm.set_frequency_duty(12, black_box(1_000), 50).expect("Should program channel"))
    });

    c.bench_function("pwm_enable_disable", |b| {
        b.iter(|| {
            pwm.enable(18).expect("Should enable");
            pwm.disable(18).expect("Should disable");
        })
    });
}

criterion_group!(
    benches,
    bench_dht11_decode,
    bench_pwm_derivation,
    bench_pwm_registers
);
criterion_main!(benches);
