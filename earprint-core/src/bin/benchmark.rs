fn main() {
    if let Err(e) = run() {
        eprintln!("benchmark failed: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    use earprint_core::render::{Brir, OrientationKey, RealTimeConvolver, RenderConfig};
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use serde::Serialize;
    use std::path::PathBuf;
    use std::time::Instant;

    #[derive(Debug)]
    struct Args {
        blocks: usize,
        block_size: usize,
        ir_length: usize,
        angles: usize,
        sample_rate: u32,
        output: Option<PathBuf>,
    }

    #[derive(Debug, Clone, Serialize)]
    struct Summary {
        blocks: usize,
        block_size: usize,
        ir_length: usize,
        angles: usize,
        fft_size: usize,
        blocks_per_second: f64,
        realtime_factor: f64,
        avg_latency_ms: f64,
        p50_latency_ms: f64,
        p95_latency_ms: f64,
        max_latency_ms: f64,
    }

    fn parse_value<T: std::str::FromStr>(flag: &str, value: Option<String>) -> Result<T, String> {
        let Some(v) = value else {
            return Err(format!("missing value for {flag}"));
        };
        v.parse::<T>()
            .map_err(|_| format!("invalid value for {flag}: {v}"))
    }

    fn parse_args() -> Result<Args, String> {
        let mut args = Args {
            blocks: 1_000,
            block_size: 1_024,
            ir_length: 48_000,
            angles: 8,
            sample_rate: 48_000,
            output: None,
        };

        let mut it = std::env::args().skip(1);
        while let Some(arg) = it.next() {
            match arg.as_str() {
                "--blocks" => args.blocks = parse_value::<usize>(&arg, it.next())?.max(1),
                "--block-size" => args.block_size = parse_value(&arg, it.next())?,
                "--ir-length" => args.ir_length = parse_value::<usize>(&arg, it.next())?.max(1),
                "--angles" => args.angles = parse_value::<usize>(&arg, it.next())?.max(1),
                "--sample-rate" => args.sample_rate = parse_value(&arg, it.next())?,
                "--output" => args.output = Some(PathBuf::from(parse_value::<String>(&arg, it.next())?)),
                "--help" | "-h" => {
                    println!(
                        "Usage: cargo run -p earprint-core --release --bin benchmark -- \\
  [--blocks <n>] [--block-size <n>] [--ir-length <n>] [--angles <n>] \\
  [--sample-rate <hz>] [--output <file.json>]"
                    );
                    std::process::exit(0);
                }
                other => {
                    return Err(format!("unknown argument: {other}"));
                }
            }
        }
        Ok(args)
    }

    fn percentile(values: &[f64], p: f64) -> f64 {
        if values.is_empty() {
            return 0.0;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let idx = ((sorted.len() - 1) as f64 * p.clamp(0.0, 1.0)).round() as usize;
        sorted[idx.min(sorted.len() - 1)]
    }

    let args = parse_args()?;

    // Decaying noise stands in for measured BRIRs.
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut random_ir = |len: usize| -> Vec<f32> {
        (0..len)
            .map(|i| {
                let decay = (-(i as f32) / (len as f32 / 6.0)).exp();
                rng.gen_range(-1.0f32..1.0) * decay
            })
            .collect()
    };
    let brirs: Vec<Brir> = (0..args.angles)
        .map(|k| {
            let yaw = k as f32 * 360.0 / args.angles as f32;
            Brir::new(
                OrientationKey::Yaw(yaw),
                random_ir(args.ir_length),
                random_ir(args.ir_length),
            )
        })
        .collect();

    let config = RenderConfig::new(args.block_size);
    let mut convolver =
        RealTimeConvolver::from_brirs(brirs, args.sample_rate, &config).map_err(|e| e.to_string())?;

    println!(
        "Running Earprint benchmark: {} blocks of {} samples, {} angles, IR length {} (fft {})",
        args.blocks,
        args.block_size,
        args.angles,
        args.ir_length,
        convolver.fft_size()
    );

    let input: Vec<Vec<f32>> = (0..2)
        .map(|_| (0..args.block_size).map(|_| rng.gen_range(-0.5f32..0.5)).collect())
        .collect();
    let mut left = vec![0.0f32; args.block_size];
    let mut right = vec![0.0f32; args.block_size];

    let mut latencies = Vec::with_capacity(args.blocks);
    let started = Instant::now();
    for i in 0..args.blocks {
        // Sweep the head around once over the run.
        let yaw = 360.0 * i as f32 / args.blocks as f32;
        convolver.set_orientation(yaw, 0.0, 0.0);
        let t = Instant::now();
        convolver
            .process_block(&input, &mut left, &mut right)
            .map_err(|e| e.to_string())?;
        latencies.push(t.elapsed().as_secs_f64() * 1000.0);
    }
    let elapsed = started.elapsed().as_secs_f64();

    let blocks_per_second = args.blocks as f64 / elapsed.max(f64::EPSILON);
    let block_seconds = args.block_size as f64 / args.sample_rate as f64;
    let summary = Summary {
        blocks: args.blocks,
        block_size: args.block_size,
        ir_length: args.ir_length,
        angles: args.angles,
        fft_size: convolver.fft_size(),
        blocks_per_second,
        realtime_factor: blocks_per_second * block_seconds,
        avg_latency_ms: latencies.iter().sum::<f64>() / latencies.len() as f64,
        p50_latency_ms: percentile(&latencies, 0.50),
        p95_latency_ms: percentile(&latencies, 0.95),
        max_latency_ms: latencies.iter().copied().fold(0.0, f64::max),
    };

    println!(
        "Done. {:.1} blocks/s ({:.1}x real time) avg={:.3}ms p95={:.3}ms",
        summary.blocks_per_second,
        summary.realtime_factor,
        summary.avg_latency_ms,
        summary.p95_latency_ms
    );

    let json = serde_json::to_string_pretty(&summary).map_err(|e| e.to_string())?;
    if let Some(out) = args.output {
        if let Some(parent) = out.parent() {
            std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
        std::fs::write(&out, json).map_err(|e| e.to_string())?;
        println!("Wrote benchmark report: {}", out.display());
    } else {
        println!("{json}");
    }

    Ok(())
}
