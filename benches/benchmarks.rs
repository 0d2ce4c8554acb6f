use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use glam::DVec2;

use mmwg_rs::geometry::{Contour, Slice};
use mmwg_rs::params::{MouthBoundary, SimulationParameters};
use mmwg_rs::{CenterlineSample, Simulation};

fn circle(radius: f64, n: usize) -> Contour {
    let pts = (0..n)
        .map(|i| {
            let t = 2. * std::f64::consts::PI * i as f64 / n as f64;
            DVec2::new(radius * t.cos(), radius * t.sin())
        })
        .collect();
    Contour::with_uniform_tag(pts, 2).unwrap()
}

fn tube_slices(num_slices: usize) -> Vec<Slice> {
    (0..num_slices)
        .map(|i| Slice {
            contour: circle(1. + 0.3 * (i as f64 * 0.8).sin(), 24),
            sample: CenterlineSample::new(DVec2::new(3. * i as f64, 0.), DVec2::new(0., 1.)),
        })
        .collect()
}

fn params() -> SimulationParameters {
    let mut params = SimulationParameters::default();
    params.curved = false;
    params.max_cut_on_freq = 12000.;
    params.mouth_boundary_cond = MouthBoundary::ZeroPressure;
    params
}

fn bench_precompute(c: &mut Criterion) {
    let mut group = c.benchmark_group("precompute");
    for &size in &[3usize, 6] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let mut sim = Simulation::new(params());
                sim.load_slices(tube_slices(size)).unwrap();
                sim.precompute().unwrap();
                std::hint::black_box(sim.sections.len());
            });
        });
    }
    group.finish();
}

fn bench_single_frequency_solve(c: &mut Criterion) {
    let mut group = c.benchmark_group("solve");
    for &order in &[2usize, 4] {
        let mut p = params();
        p.order_magnus_scheme = order;
        let mut sim = Simulation::new(p);
        sim.load_slices(tube_slices(5)).unwrap();
        sim.precompute().unwrap();
        group.bench_with_input(BenchmarkId::new("magnus", order), &order, |b, _| {
            b.iter(|| {
                sim.solve_wave_problem(std::hint::black_box(1234.5)).unwrap();
                std::hint::black_box(sim.sections[0].zin()[(0, 0)]);
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_precompute, bench_single_frequency_solve);
criterion_main!(benches);
