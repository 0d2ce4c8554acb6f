use glam::DVec2;

use mmwg_rs::geometry::{Contour, Slice};
use mmwg_rs::params::SimulationParameters;
use mmwg_rs::processing::csv::export_geometry;
use mmwg_rs::{CenterlineSample, Simulation};

fn ellipse(a: f64, b: f64, n: usize) -> Contour {
    let pts = (0..n)
        .map(|i| {
            let t = 2. * std::f64::consts::PI * i as f64 / n as f64;
            DVec2::new(a * t.cos(), b * t.sin())
        })
        .collect();
    Contour::with_uniform_tag(pts, 2).unwrap()
}

fn slices() -> Vec<Slice> {
    vec![
        Slice {
            contour: ellipse(1., 0.8, 20),
            sample: CenterlineSample::new(DVec2::new(0., 0.), DVec2::new(0., 1.)),
        },
        Slice {
            contour: ellipse(1.2, 1., 20),
            sample: CenterlineSample::new(DVec2::new(6., 0.), DVec2::new(0., 1.)),
        },
        Slice {
            contour: ellipse(0.9, 0.7, 20),
            sample: CenterlineSample::new(DVec2::new(12., 0.), DVec2::new(0., 1.)),
        },
    ]
}

fn params() -> SimulationParameters {
    let mut params = SimulationParameters::default();
    params.curved = false;
    params.varying_area = false;
    params.max_cut_on_freq = 15000.;
    params
}

#[test]
fn exported_geometry_rebuilds_identically() {
    let mut sim = Simulation::new(params());
    sim.load_slices(slices()).unwrap();

    let dir = std::env::temp_dir().join("mmwg_roundtrip_full");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("geometry.csv");
    export_geometry(&path, &sim.sections).unwrap();

    let mut sim2 = Simulation::new(params());
    sim2.load_csv_geometry(&path, false).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(sim.sections.len(), sim2.sections.len());
    for (a, b) in sim.sections.iter().zip(&sim2.sections) {
        match (a.fem(), b.fem()) {
            (Some(fa), Some(fb)) => {
                assert_eq!(fa.contour.len(), fb.contour.len());
                assert!(fa.contour.similar(&fb.contour, 1e-9));
            }
            (None, None) => {}
            _ => panic!("section kinds differ after the round trip"),
        }
        approx::assert_abs_diff_eq!(a.length(), b.length(), epsilon = 1e-9);
        assert_eq!(a.prev, b.prev);
        assert_eq!(a.next, b.next);
    }
}

#[test]
fn modal_spectrum_survives_the_round_trip() {
    let mut sim = Simulation::new(params());
    sim.load_slices(slices()).unwrap();
    sim.precompute().unwrap();

    let dir = std::env::temp_dir().join("mmwg_roundtrip_modes");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("geometry.csv");
    export_geometry(&path, &sim.sections).unwrap();

    let mut sim2 = Simulation::new(params());
    sim2.load_csv_geometry(&path, false).unwrap();
    sim2.precompute().unwrap();
    std::fs::remove_file(&path).ok();

    for (a, b) in sim.sections.iter().zip(&sim2.sections) {
        let fa = a.eigen_freqs();
        let fb = b.eigen_freqs();
        assert_eq!(fa.len(), fb.len());
        for (x, y) in fa.iter().zip(fb) {
            assert!(
                (x - y).abs() <= 1e-10 * x.abs().max(1.),
                "eigen frequencies differ: {x} vs {y}"
            );
        }
    }
}
