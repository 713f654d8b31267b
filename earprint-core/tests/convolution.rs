use approx::assert_abs_diff_eq;

use earprint_core::crosstalk::{design_crosstalk_filters, CrosstalkPaths};
use earprint_core::ir::{EarPair, HrirTable, ImpulseResponse, SweepSpec};
use earprint_core::render::{offline, Brir, OrientationKey, RealTimeConvolver, RenderConfig};
use earprint_core::speaker::Speaker;
use earprint_core::{CorrectionPipeline, ProcessingConfig};

const FS: u32 = 48_000;

fn signal(len: usize, seed: u32) -> Vec<f32> {
    // Deterministic pseudo-noise in [-1, 1).
    let mut state = seed.wrapping_mul(747_796_405).wrapping_add(2_891_336_453);
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state as f32 / u32::MAX as f32) * 2.0 - 1.0
        })
        .collect()
}

fn direct_convolution(x: &[f32], h: &[f32]) -> Vec<f32> {
    let mut y = vec![0.0f32; x.len() + h.len() - 1];
    for (i, xv) in x.iter().enumerate() {
        for (j, hv) in h.iter().enumerate() {
            y[i + j] += xv * hv;
        }
    }
    y
}

fn ir(data: Vec<f32>) -> ImpulseResponse {
    ImpulseResponse::new(data, FS)
}

fn yaw_brir(yaw: f32, left: f32, right: f32) -> Brir {
    Brir::new(OrientationKey::Yaw(yaw), vec![left], vec![right])
}

fn render_constant(convolver: &mut RealTimeConvolver) -> [Vec<f32>; 2] {
    let block = convolver.block_size();
    convolver
        .process(&[vec![1.0f32; block], vec![1.0f32; block]])
        .expect("process")
}

#[test]
fn streamed_blocks_match_direct_convolution() {
    let block = 64;
    let h_left = signal(300, 1);
    let h_right = signal(300, 2);
    let x = signal(block * 10, 3);

    let mut table = HrirTable::new(SweepSpec::standard(FS));
    table
        .insert(Speaker::FrontCenter, EarPair::new(ir(h_left.clone()), ir(h_right.clone())))
        .unwrap();
    let mut convolver = RealTimeConvolver::from_table(&table, &RenderConfig::new(block)).unwrap();
    let [left, right] = offline::render(&mut convolver, &[x.clone()]).unwrap();

    let expected_left = direct_convolution(&x, &h_left);
    let expected_right = direct_convolution(&x, &h_right);
    for n in 0..x.len() {
        assert_abs_diff_eq!(left[n], expected_left[n], epsilon = 1e-3);
        assert_abs_diff_eq!(right[n], expected_right[n], epsilon = 1e-3);
    }
}

#[test]
fn single_brir_is_reproduced_exactly() {
    let block = 128;
    let brir_left = signal(200, 4);
    let brir_right = signal(200, 5);
    let brirs = vec![Brir::new(OrientationKey::Yaw(30.0), brir_left.clone(), brir_right.clone())];
    let mut convolver = RealTimeConvolver::from_brirs(brirs, FS, &RenderConfig::new(block)).unwrap();
    convolver.set_orientation(200.0, 0.0, 0.0);

    let mut impulse = vec![0.0f32; block * 3];
    impulse[0] = 1.0;
    let [left, right] = offline::render(&mut convolver, &[impulse.clone(), impulse]).unwrap();
    for n in 0..200 {
        assert_abs_diff_eq!(left[n], brir_left[n], epsilon = 1e-5);
        assert_abs_diff_eq!(right[n], brir_right[n], epsilon = 1e-5);
    }
    assert!(left[200..].iter().all(|v| v.abs() < 1e-5));
}

#[test]
fn halfway_between_two_angles_blends_equally() {
    let brirs = vec![yaw_brir(0.0, 1.0, 0.0), yaw_brir(90.0, 0.0, 1.0)];
    let mut convolver = RealTimeConvolver::from_brirs(brirs, FS, &RenderConfig::new(32)).unwrap();
    convolver.set_orientation(45.0, 0.0, 0.0);
    let [left, right] = render_constant(&mut convolver);
    assert!(left.iter().all(|v| (v - 0.5).abs() < 1e-5));
    assert!(right.iter().all(|v| (v - 0.5).abs() < 1e-5));
}

#[test]
fn three_angle_blend_uses_inverse_distance() {
    // Distances 45, 45 and 135 give weights 3/7, 3/7 and 1/7.
    let brirs = vec![
        yaw_brir(0.0, 1.0, 0.0),
        yaw_brir(90.0, 2.0, 0.0),
        yaw_brir(180.0, 4.0, 1.0),
    ];
    let mut convolver = RealTimeConvolver::from_brirs(brirs, FS, &RenderConfig::new(32)).unwrap();
    convolver.set_orientation(45.0, 0.0, 0.0);
    let [left, right] = render_constant(&mut convolver);
    let expected_left = (3.0 * 1.0 + 3.0 * 2.0 + 4.0) / 7.0;
    assert!(left.iter().all(|v| (v - expected_left).abs() < 1e-4));
    assert!(right.iter().all(|v| (v - 1.0 / 7.0).abs() < 1e-4));
}

#[test]
fn yaw_distance_wraps_around_north() {
    // 350 degrees is 10 from 0 and 100 from 90: weights 10/11 and 1/11.
    let brirs = vec![yaw_brir(0.0, 1.0, 0.0), yaw_brir(90.0, 0.0, 1.0)];
    let mut convolver = RealTimeConvolver::from_brirs(brirs, FS, &RenderConfig::new(32)).unwrap();
    convolver.set_orientation(350.0, 0.0, 0.0);
    let [left, right] = render_constant(&mut convolver);
    assert!(left.iter().all(|v| (v - 10.0 / 11.0).abs() < 1e-4));
    assert!(right.iter().all(|v| (v - 1.0 / 11.0).abs() < 1e-4));
}

#[test]
fn non_finite_orientation_keeps_previous_blend() {
    let brirs = vec![yaw_brir(0.0, 1.0, 0.0), yaw_brir(90.0, 0.0, 1.0)];
    let mut convolver = RealTimeConvolver::from_brirs(brirs, FS, &RenderConfig::new(32)).unwrap();
    convolver.set_orientation(90.0, 0.0, 0.0);
    convolver.set_orientation(f32::NAN, 0.0, 0.0);
    convolver.set_orientation(0.0, 0.0, f32::NEG_INFINITY);
    let [left, right] = render_constant(&mut convolver);
    assert!(left.iter().all(|v| v.abs() < 1e-5));
    assert!(right.iter().all(|v| (v - 1.0).abs() < 1e-5));
}

#[test]
fn euler_keys_use_plain_distance() {
    let brirs = vec![
        Brir::new(OrientationKey::Euler { yaw: 0.0, pitch: 0.0, roll: 0.0 }, vec![1.0], vec![1.0]),
        Brir::new(OrientationKey::Euler { yaw: 0.0, pitch: 30.0, roll: 0.0 }, vec![0.0], vec![0.0]),
    ];
    let mut convolver = RealTimeConvolver::from_brirs(brirs, FS, &RenderConfig::new(16)).unwrap();
    // Distances 10 and 20: weights 2/3 and 1/3.
    convolver.set_orientation(0.0, 10.0, 0.0);
    let [left, _] = render_constant(&mut convolver);
    assert!(left.iter().all(|v| (v - 2.0 / 3.0).abs() < 1e-4));
}

#[test]
fn crosstalk_cancellation_restores_program_at_the_ears() {
    let paths = CrosstalkPaths {
        left_to_left: vec![1.0],
        left_to_right: vec![0.5],
        right_to_left: vec![0.5],
        right_to_right: vec![1.0],
        sample_rate: FS,
    };
    let filters = design_crosstalk_filters(&paths, 8, 0.0);
    assert_eq!(filters.singular_bins, 0);

    let mut table = HrirTable::new(SweepSpec::standard(FS));
    table
        .insert(Speaker::FrontLeft, EarPair::new(ir(vec![1.0]), ir(vec![0.0])))
        .unwrap();
    table
        .insert(Speaker::FrontRight, EarPair::new(ir(vec![0.0]), ir(vec![1.0])))
        .unwrap();
    let config = RenderConfig::new(64).with_crosstalk(filters);
    let mut convolver = RealTimeConvolver::from_table(&table, &config).unwrap();
    assert!(convolver.has_crosstalk());

    let program_left = signal(64 * 4, 6);
    let program_right = signal(64 * 4, 7);
    let [speaker_left, speaker_right] =
        offline::render(&mut convolver, &[program_left.clone(), program_right.clone()]).unwrap();

    // Acoustic mixing of the two speakers at each ear.
    for n in 0..program_left.len() {
        let ear_left = speaker_left[n] * 1.0 + speaker_right[n] * 0.5;
        let ear_right = speaker_left[n] * 0.5 + speaker_right[n] * 1.0;
        assert_abs_diff_eq!(ear_left, program_left[n], epsilon = 1e-4);
        assert_abs_diff_eq!(ear_right, program_right[n], epsilon = 1e-4);
    }
}

#[test]
fn corrected_table_renders_with_cropped_heads() {
    let spike = |at: usize, gain: f32| {
        let mut data = vec![0.0f32; 2_048];
        data[at] = gain;
        ir(data)
    };
    let mut table = HrirTable::new(SweepSpec::standard(FS));
    table
        .insert(Speaker::FrontLeft, EarPair::new(spike(300, 1.0), spike(310, 0.5)))
        .unwrap();
    table
        .insert(Speaker::FrontRight, EarPair::new(spike(310, 0.5), spike(300, 1.0)))
        .unwrap();

    let report = CorrectionPipeline::new(ProcessingConfig::default())
        .run(&mut table)
        .unwrap();
    assert_eq!(report.itds.len(), 2);

    let mut convolver = RealTimeConvolver::from_table(&table, &RenderConfig::new(256)).unwrap();
    assert_eq!(convolver.channels(), Some(&[Speaker::FrontLeft, Speaker::FrontRight][..]));
    let mut impulse = vec![0.0f32; 512];
    impulse[0] = 1.0;
    let [left, right] = offline::render(&mut convolver, &[impulse, vec![0.0; 512]]).unwrap();

    let peak = |x: &[f32]| {
        x.iter()
            .enumerate()
            .max_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
            .map(|(i, _)| i)
            .unwrap()
    };
    assert_eq!(peak(&left), 48);
    assert_eq!(peak(&right), 58);
}
