use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use log::info;

use fbf_io::{
    load_beams, load_boundary_conditions, load_coordinates, load_displacements, load_tetrahedra,
    write_scalar_pairs, write_vector_table,
};
use fbf_solver::{
    FiberModel, LookupTable, RegularizeConfig, RelaxConfig, RelaxationReport,
    SemiAffineFiberMaterial, force_densities,
};

fn usage() {
    eprintln!("usage:");
    eprintln!("  fbf-cli relax <coords> <tets> <bcond> <outdir> [options]");
    eprintln!("  fbf-cli regularize <coords> <tets> <targets> <outdir> [options]");
    eprintln!("  fbf-cli --help");
    eprintln!("  fbf-cli --version");
    eprintln!();
    eprintln!("options:");
    eprintln!("  --beams <n>           number of generated beam directions (default 150)");
    eprintln!("  --beam-file <path>    load beam directions from a file instead");
    eprintln!("  --material <k> <d0> <s1> <ds1>");
    eprintln!("                        semi-affine fiber parameters");
    eprintln!("                        (default 1645 0.0008 0.0075 0.033)");
    eprintln!("  --stepper <x>         outer step fraction");
    eprintln!("  --iterations <n>      outer iteration cap");
    eprintln!("  --stability <x>       relative energy-stability threshold");
    eprintln!("  --alpha <x>           regularization strength (regularize only)");
    eprintln!();
    eprintln!("examples:");
    eprintln!("  fbf-cli relax coords.dat tets.dat bcond.dat out/");
    eprintln!("  fbf-cli regularize coords.dat tets.dat Utarget.dat out/ --alpha 1e-3");
}

struct Options {
    beam_count: usize,
    beam_file: Option<PathBuf>,
    material: [f64; 4],
    stepper: Option<f64>,
    iterations: Option<usize>,
    stability: Option<f64>,
    alpha: Option<f64>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            beam_count: 150,
            beam_file: None,
            material: [1645.0, 0.0008, 0.0075, 0.033],
            stepper: None,
            iterations: None,
            stability: None,
            alpha: None,
        }
    }
}

fn parse_value<T: std::str::FromStr>(args: &[String], index: usize, flag: &str) -> Result<T, String> {
    args.get(index)
        .ok_or_else(|| format!("{flag} needs a value"))?
        .parse()
        .map_err(|_| format!("{flag}: cannot parse {:?}", args[index]))
}

fn parse_options(args: &[String]) -> Result<Options, String> {
    let mut options = Options::default();
    let mut index = 0;
    while index < args.len() {
        match args[index].as_str() {
            "--beams" => {
                options.beam_count = parse_value(args, index + 1, "--beams")?;
                index += 2;
            }
            "--beam-file" => {
                options.beam_file = Some(PathBuf::from(
                    args.get(index + 1)
                        .ok_or_else(|| "--beam-file needs a path".to_string())?,
                ));
                index += 2;
            }
            "--material" => {
                for slot in 0..4 {
                    options.material[slot] = parse_value(args, index + 1 + slot, "--material")?;
                }
                index += 5;
            }
            "--stepper" => {
                options.stepper = Some(parse_value(args, index + 1, "--stepper")?);
                index += 2;
            }
            "--iterations" => {
                options.iterations = Some(parse_value(args, index + 1, "--iterations")?);
                index += 2;
            }
            "--stability" => {
                options.stability = Some(parse_value(args, index + 1, "--stability")?);
                index += 2;
            }
            "--alpha" => {
                options.alpha = Some(parse_value(args, index + 1, "--alpha")?);
                index += 2;
            }
            other => return Err(format!("unknown option {other:?}")),
        }
    }
    Ok(options)
}

fn build_model(
    coords: &Path,
    tets: &Path,
    options: &Options,
) -> Result<FiberModel, String> {
    let nodes = load_coordinates(coords).map_err(|e| e.to_string())?;
    let elements = load_tetrahedra(tets).map_err(|e| e.to_string())?;
    info!(
        "loaded {} nodes and {} tetrahedra",
        nodes.len(),
        elements.len()
    );

    let mut model = FiberModel::new();
    model.set_nodes(nodes).map_err(|e| e.to_string())?;
    model.set_tetrahedra(elements).map_err(|e| e.to_string())?;

    match &options.beam_file {
        Some(path) => {
            let beams = load_beams(path).map_err(|e| e.to_string())?;
            info!("loaded {} beams from {}", beams.len(), path.display());
            model.set_beams(beams).map_err(|e| e.to_string())?;
        }
        None => {
            model
                .compute_beams(options.beam_count)
                .map_err(|e| e.to_string())?;
            info!("generated {} beams", options.beam_count);
        }
    }

    let [k, d0, s1, ds1] = options.material;
    let fiber = SemiAffineFiberMaterial::new(k, d0, s1, ds1);
    let table = LookupTable::sample(
        &fiber,
        LookupTable::DEFAULT_MAX_STRAIN,
        LookupTable::DEFAULT_STEP,
    )
    .map_err(|e| e.to_string())?;
    model.set_material_model(Box::new(table));

    Ok(model)
}

fn store_results(model: &FiberModel, outdir: &Path) -> Result<(), String> {
    fs::create_dir_all(outdir).map_err(|e| e.to_string())?;

    write_vector_table(outdir.join("R.dat"), model.nodes()).map_err(|e| e.to_string())?;
    write_vector_table(outdir.join("U.dat"), model.displacements()).map_err(|e| e.to_string())?;
    let forces = model
        .forces()
        .ok_or_else(|| "no assembled state to store".to_string())?;
    write_vector_table(outdir.join("F.dat"), forces).map_err(|e| e.to_string())?;
    write_vector_table(outdir.join("RR.dat"), &model.centroids()).map_err(|e| e.to_string())?;

    let energies = model.energies().unwrap_or(&[]);
    let volumes = model.volumes().unwrap_or(&[]);
    let pairs: Vec<(f64, f64)> = energies
        .iter()
        .zip(volumes)
        .map(|(&e, &v)| (e, v))
        .collect();
    write_scalar_pairs(outdir.join("EV.dat"), &pairs).map_err(|e| e.to_string())?;

    let densities = force_densities(model).map_err(|e| e.to_string())?;
    write_vector_table(outdir.join("Fden.dat"), &densities).map_err(|e| e.to_string())?;

    Ok(())
}

fn write_summary(
    outdir: &Path,
    mode: &str,
    model: &FiberModel,
    report: &RelaxationReport,
) -> Result<(), String> {
    let summary = serde_json::json!({
        "generated": chrono::Utc::now().to_rfc3339(),
        "mode": mode,
        "nodes": model.nodes().len(),
        "tetrahedra": model.tetrahedra().len(),
        "report": serde_json::to_value(report).map_err(|e| e.to_string())?,
    });
    let text = serde_json::to_string_pretty(&summary).map_err(|e| e.to_string())?;
    fs::write(outdir.join("summary.json"), text).map_err(|e| e.to_string())?;
    Ok(())
}

fn run_relax(paths: &[String], options: &Options) -> Result<(), String> {
    let [coords, tets, bcond, outdir] = paths else {
        return Err("relax needs <coords> <tets> <bcond> <outdir>".to_string());
    };
    let mut model = build_model(Path::new(coords), Path::new(tets), options)?;

    let table = load_boundary_conditions(Path::new(bcond)).map_err(|e| e.to_string())?;
    model
        .set_boundary_condition(&table.prescribed_displacements, &table.external_forces)
        .map_err(|e| e.to_string())?;

    let mut config = RelaxConfig::default();
    if let Some(stepper) = options.stepper {
        config.stepper = stepper;
    }
    if let Some(iterations) = options.iterations {
        config.max_iterations = iterations;
    }
    if let Some(stability) = options.stability {
        config.rel_stability = stability;
    }

    let report = model.relax(&config).map_err(|e| e.to_string())?;
    println!(
        "relax finished after {} iterations: energy {:.6e}, residual {:.6e} ({:?})",
        report.iterations, report.total_energy, report.residual, report.status
    );

    let outdir = Path::new(outdir);
    store_results(&model, outdir)?;
    write_summary(outdir, "relax", &model, &report)?;
    Ok(())
}

fn run_regularize(paths: &[String], options: &Options) -> Result<(), String> {
    let [coords, tets, targets, outdir] = paths else {
        return Err("regularize needs <coords> <tets> <targets> <outdir>".to_string());
    };
    let mut model = build_model(Path::new(coords), Path::new(tets), options)?;

    let target_rows = load_displacements(Path::new(targets)).map_err(|e| e.to_string())?;
    model
        .set_target_displacements(target_rows)
        .map_err(|e| e.to_string())?;

    let mut config = RegularizeConfig::default();
    if let Some(stepper) = options.stepper {
        config.stepper = stepper;
    }
    if let Some(iterations) = options.iterations {
        config.max_iterations = iterations;
    }
    if let Some(stability) = options.stability {
        config.rel_stability = stability;
    }
    if let Some(alpha) = options.alpha {
        config.alpha = alpha;
    }

    let report = model.regularize(&config).map_err(|e| e.to_string())?;
    println!(
        "regularize finished after {} iterations: energy {:.6e}, residual {:.6e} ({:?})",
        report.iterations, report.total_energy, report.residual, report.status
    );

    let outdir = Path::new(outdir);
    store_results(&model, outdir)?;
    write_summary(outdir, "regularize", &model, &report)?;
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    match args.get(1).map(String::as_str) {
        Some("help") | Some("-h") | Some("--help") => {
            usage();
            ExitCode::SUCCESS
        }
        Some("--version") | Some("-V") => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        Some(mode @ ("relax" | "regularize")) => {
            if args.len() < 6 {
                usage();
                return ExitCode::from(2);
            }
            let paths = &args[2..6];
            let options = match parse_options(&args[6..]) {
                Ok(options) => options,
                Err(err) => {
                    eprintln!("argument error: {err}");
                    return ExitCode::from(2);
                }
            };
            let outcome = if mode == "relax" {
                run_relax(paths, &options)
            } else {
                run_regularize(paths, &options)
            };
            match outcome {
                Ok(()) => ExitCode::SUCCESS,
                Err(err) => {
                    eprintln!("{mode} error: {err}");
                    ExitCode::from(1)
                }
            }
        }
        _ => {
            usage();
            ExitCode::from(2)
        }
    }
}
