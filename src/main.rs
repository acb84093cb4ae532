use std::{path::PathBuf, process};

use anyhow::Context;
use handtrack::{
    detector::HandDetector,
    image::Image,
    nn::OnnxLoader,
    params::{ModelParameters, ModelType},
    timer::FpsCounter,
};

const USAGE: &str = "usage: handtrack [--no-flip] [--threshold <score>] [--model <path>] \
                     [--outputs <scores>,<boxes>] <image>...";

struct Args {
    params: ModelParameters,
    outputs: Option<Vec<usize>>,
    images: Vec<PathBuf>,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut params = ModelParameters::default();
    let mut outputs = None;
    let mut images = Vec::new();

    let mut args = std::env::args_os().skip(1);
    while let Some(arg) = args.next() {
        match arg.to_str() {
            Some("--no-flip") => params.flip_horizontal = false,
            Some("--threshold") => {
                let value = args.next().context("`--threshold` requires a value")?;
                let value = value.to_string_lossy();
                params.score_threshold = value
                    .parse()
                    .with_context(|| format!("invalid score threshold '{value}'"))?;
            }
            Some("--model") => {
                let path = args.next().context("`--model` requires a path")?;
                params.model_type = ModelType::Custom(path.into());
            }
            Some("--outputs") => {
                let value = args.next().context("`--outputs` requires a value")?;
                let value = value.to_string_lossy();
                let indices = value
                    .split(',')
                    .map(|index| index.trim().parse::<usize>())
                    .collect::<Result<Vec<_>, _>>()
                    .with_context(|| format!("invalid output list '{value}'"))?;
                outputs = Some(indices);
            }
            Some("-h" | "--help") => {
                println!("{USAGE}");
                process::exit(0);
            }
            Some(flag) if flag.starts_with("--") => anyhow::bail!("unknown option '{flag}'"),
            _ => images.push(PathBuf::from(&arg)),
        }
    }

    Ok(Args {
        params,
        outputs,
        images,
    })
}

fn main() -> anyhow::Result<()> {
    handtrack::init_logger!();

    let args = match parse_args() {
        Ok(args) if !args.images.is_empty() => args,
        Ok(_) => {
            eprintln!("{USAGE}");
            process::exit(1);
        }
        Err(e) => {
            eprintln!("{e:#}\n{USAGE}");
            process::exit(1);
        }
    };

    let mut detector = match args.outputs {
        Some(outputs) => {
            let mut detector = HandDetector::new(args.params);
            detector.load(&OnnxLoader::from_env().with_output_selection(outputs))?;
            detector
        }
        None => HandDetector::load_default(args.params)?,
    };
    log::info!("loaded {:?}", detector);

    let mut fps = FpsCounter::new("hand detector");
    for path in &args.images {
        let image =
            Image::load(path).with_context(|| format!("failed to load '{}'", path.display()))?;
        let detections = detector.detect(&image)?;

        println!("{}: {} hand(s)", path.display(), detections.len());
        for det in &detections {
            let [x, y, w, h] = det.bbox;
            println!(
                "  class {} score {:.3} at x={x:.1} y={y:.1} w={w:.1} h={h:.1}",
                det.class, det.score
            );
        }

        fps.tick_with(detector.timers());
    }
    log::debug!("last frame: {} FPS", detector.fps());

    detector.dispose();
    Ok(())
}
