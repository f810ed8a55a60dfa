use criterion::{criterion_group, criterion_main, Criterion};

use smartx_common::area::make_non_interleaved_areas;
use smartx_common::{copy_audio_area_buffers, RingBufferAccess, SampleFormat};
use smartx_ringbuf::{RingBufferFactory, RingBufferType};

fn copier(c: &mut Criterion) {
    let mut group = c.benchmark_group("copier");
    let frames = 1024u32;
    let channels = 2u32;

    let mut src = vec![0.5f32; (frames * channels) as usize];
    let mut dst_f32 = vec![0.0f32; (frames * channels) as usize];
    let mut dst_i16 = vec![0i16; (frames * channels) as usize];

    let src_areas = make_non_interleaved_areas(
        src.as_mut_ptr() as *mut u8,
        channels,
        frames,
        SampleFormat::Float32,
    );
    let dst_f32_areas = make_non_interleaved_areas(
        dst_f32.as_mut_ptr() as *mut u8,
        channels,
        frames,
        SampleFormat::Float32,
    );
    let dst_i16_areas = make_non_interleaved_areas(
        dst_i16.as_mut_ptr() as *mut u8,
        channels,
        frames,
        SampleFormat::Int16,
    );

    group.bench_function("f32_to_f32_1024x2", |b| {
        b.iter(|| {
            copy_audio_area_buffers(
                &dst_f32_areas,
                SampleFormat::Float32,
                0,
                channels,
                0,
                frames,
                &src_areas,
                SampleFormat::Float32,
                0,
                channels,
                0,
                frames,
            );
        })
    });

    group.bench_function("f32_to_i16_1024x2", |b| {
        b.iter(|| {
            copy_audio_area_buffers(
                &dst_i16_areas,
                SampleFormat::Int16,
                0,
                channels,
                0,
                frames,
                &src_areas,
                SampleFormat::Float32,
                0,
                channels,
                0,
                frames,
            );
        })
    });

    group.finish();
}

fn ring_buffer(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_buffer");
    let factory = RingBufferFactory::new();
    let mut buffer = factory
        .create_ring_buffer(
            1024,
            4,
            2,
            SampleFormat::Float32,
            RingBufferType::LocalReal,
            &format!("bench_ring_{}", std::process::id()),
            "audio",
        )
        .expect("create bench buffer");

    group.bench_function("begin_end_cycle_1024", |b| {
        b.iter(|| {
            let mut frames = 1024;
            let offset = buffer
                .begin_access(RingBufferAccess::Write, &mut frames)
                .expect("begin write");
            buffer
                .end_access(RingBufferAccess::Write, offset, frames)
                .expect("end write");
            let mut frames = 1024;
            let offset = buffer
                .begin_access(RingBufferAccess::Read, &mut frames)
                .expect("begin read");
            buffer
                .end_access(RingBufferAccess::Read, offset, frames)
                .expect("end read");
        })
    });

    group.finish();
    factory.destroy_ring_buffer(buffer);
}

criterion_group!(benches, copier, ring_buffer);
criterion_main!(benches);
