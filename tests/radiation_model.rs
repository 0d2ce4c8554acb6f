use glam::DVec2;
use num_complex::Complex64;

use mmwg_rs::geometry::{Contour, Slice};
use mmwg_rs::params::{MouthBoundary, SimulationParameters};
use mmwg_rs::physics::radiation::compute_radiation_basis;
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

fn tube_slices(radius: f64, length: f64) -> Vec<Slice> {
    vec![
        Slice {
            contour: circle(radius, 24),
            sample: CenterlineSample::new(DVec2::new(0., 0.), DVec2::new(0., 1.)),
        },
        Slice {
            contour: circle(radius, 24),
            sample: CenterlineSample::new(DVec2::new(length, 0.), DVec2::new(0., 1.)),
        },
    ]
}

fn small_params() -> SimulationParameters {
    let mut params = SimulationParameters::default();
    params.curved = false;
    params.varying_area = false;
    params.max_cut_on_freq = 2000.;
    params
}

#[test]
fn pml_plane_mode_is_radiating() {
    // the PML must absorb the outgoing plane wave: the characteristic
    // impedance of the radiation disk has a positive, propagating plane
    // mode entry comparable to the free wave impedance 1/k
    let params = small_params();
    let basis = compute_radiation_basis(2., 2., &params, 0).unwrap();
    let freq = 2000.;
    let k = params.wavenumber(freq);
    let zc = basis.characteristic_impedance(freq, &params);

    let plane = zc[(0, 0)];
    assert!(plane.re > 0., "plane mode entry must dissipate, got {plane}");
    let magnitude = plane.norm() * k;
    assert!(
        (0.2..5.).contains(&magnitude),
        "plane mode magnitude {magnitude} far from the free wave impedance"
    );
}

#[test]
fn radiation_impedance_has_positive_resistance() {
    let mut params = small_params();
    params.mouth_boundary_cond = MouthBoundary::Radiation;
    let mut sim = Simulation::new(params);
    sim.load_slices(tube_slices(1., 8.)).unwrap();
    sim.precompute().unwrap();

    // in the long wavelength regime every kernel phase k r stays below pi,
    // which pins the sign of both parts of the plane mode entry
    let z = sim.radiation_impedance(500., 10.).unwrap();
    assert!(z[(0, 0)].norm() > 0.);
    assert!(z[(0, 0)].re < 0., "Z(0,0) = {}", z[(0, 0)]);
    // the physical resistance of the aperture is w rho Im(Z)
    assert!(z[(0, 0)].im > 0., "Z(0,0) = {}", z[(0, 0)]);
}

#[test]
fn radiation_spline_matches_direct_computation_at_samples() {
    let mut params = small_params();
    params.mouth_boundary_cond = MouthBoundary::Radiation;
    let mut sim = Simulation::new(params);
    sim.load_slices(tube_slices(1., 8.)).unwrap();
    sim.precompute().unwrap();
    sim.precompute_radiation_splines(6).unwrap();

    let nb = 6usize;
    let freq_step = mmwg_rs::params::SAMPLING_RATE / 2. / (nb - 1) as f64;
    for i in 0..nb {
        let freq = (i as f64 * freq_step).max(500.);
        let direct = sim.radiation_impedance(freq, 15.).unwrap();
        let (interp, _) = sim.radiation_impedance_admittance(freq).unwrap();
        let mn = direct.nrows();
        for m in 0..mn {
            for n in 0..mn {
                let err = (direct[(m, n)] - interp[(m, n)]).norm();
                assert!(
                    err <= 1e-12 * (1. + direct[(m, n)].norm()),
                    "spline mismatch at {freq} Hz: {err}"
                );
            }
        }
    }
}

#[test]
fn radiated_pressure_decays_with_distance() {
    let mut params = small_params();
    params.mouth_boundary_cond = MouthBoundary::Radiation;
    params.compute_radiated_field = true;
    let mut sim = Simulation::new(params);
    sim.load_slices(tube_slices(1., 8.)).unwrap();
    sim.solve_wave_problem(1500.).unwrap();

    let near = sim
        .rayleigh_sommerfeld(&[glam::DVec3::new(2., 0., 0.)], 1500.)
        .unwrap()[0]
        .norm();
    let far = sim
        .rayleigh_sommerfeld(&[glam::DVec3::new(20., 0., 0.)], 1500.)
        .unwrap()[0]
        .norm();
    assert!(near.is_finite() && far.is_finite());
    assert!(far < near, "far field {far} must be weaker than near field {near}");
}

#[test]
fn degenerate_pair_modes_are_orthogonal_patterns() {
    let params = small_params();
    let basis = compute_radiation_basis(1.5, 0.75, &params, 0).unwrap();
    // evaluate the first degenerate pair on a ring of points
    let idx_cos = basis
        .orders
        .iter()
        .position(|&o| o == 1)
        .expect("a first order mode exists");
    let pts: Vec<DVec2> = (0..64)
        .map(|i| {
            let t = 2. * std::f64::consts::PI * i as f64 / 64.;
            DVec2::new(0.5 * t.cos(), 0.5 * t.sin())
        })
        .collect();
    let vals = basis.evaluate(&pts);
    let dot: f64 = (0..64)
        .map(|p| vals[(p, idx_cos)] * vals[(p, idx_cos + 1)])
        .sum();
    assert!(dot.abs() < 1e-10, "cos/sin pair not orthogonal: {dot}");
}

#[test]
fn transfer_function_sweep_fills_every_frequency() {
    let mut params = small_params();
    params.mouth_boundary_cond = MouthBoundary::ZeroPressure;
    params.max_computed_freq = 1100.;
    params.spectrum_lgth_exponent = 7; // coarse sweep to keep the test fast
    params.tf_points = vec![[2., 0., 0.]];
    let mut sim = Simulation::new(params);
    sim.load_slices(tube_slices(1., 10.)).unwrap();
    sim.compute_transfer_function().unwrap();

    let expected =
        (sim.params.max_computed_freq / sim.params.freq_step()).ceil() as usize;
    assert_eq!(sim.tf.freqs.len(), expected);
    assert_eq!(sim.tf.glottal.len(), expected);
    assert_eq!(sim.tf.noise.len(), expected);
    assert_eq!(sim.tf.plane_mode_input_impedance.len(), expected);
    for row in &sim.tf.glottal {
        assert!(row[0].norm().is_finite());
    }

    // log magnitude interpolation between two computed frequencies
    let f_mid = (sim.tf.freqs[1] + sim.tf.freqs[2]) / 2.;
    let interp = sim.interpolate_transfer_function(f_mid, 0);
    let lo = sim.tf.glottal[1][0].norm().min(sim.tf.glottal[2][0].norm());
    let hi = sim.tf.glottal[1][0].norm().max(sim.tf.glottal[2][0].norm());
    assert!(interp.norm() >= lo * 0.999 && interp.norm() <= hi * 1.001);
}
