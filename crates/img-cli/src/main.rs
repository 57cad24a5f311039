use std::time::{Duration, Instant};

use img_core::{AnalysisRequest, Criteria, JobError, JobStatus, KMeansParams, RecordFilter, Seeding};
use imgflow_rust::{AppConfig, Services};
use log::debug;
use uuid::Uuid;

const DEFAULT_WAIT_SECS: u64 = 300;

const USAGE: &str = "\
Uso:
  img-cli enqueue --dataset <ID> --image <ID> --clusters <K> --colors 'r,g,b;r,g,b;...'
                  [--criteria epsilon|max_iterations|all] [--max-iter <N>] [--attempts <N>]
                  [--epsilon <F>] [--seeding pp|random] [--seed <N>] [--wait <SECS>]
  img-cli status --result <UUID>
  img-cli cancel --result <UUID>
  img-cli download --result <UUID> --out <PATH>
  img-cli list [--status queued|processing|completed|failed] [--dataset <ID>] [--limit <N>] [--offset <N>]
  img-cli stats";

fn usage_exit(msg: &str) -> ! {
    eprintln!("[img-cli] {msg}\n{USAGE}");
    std::process::exit(2);
}

/// Pares `--flag valor` a partir de `args[2..]`.
fn flags(args: &[String]) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let mut i = 2;
    while i < args.len() {
        if let Some(name) = args[i].strip_prefix("--") {
            if i + 1 < args.len() {
                out.push((name.to_string(), args[i + 1].clone()));
                i += 1;
            } else {
                usage_exit(&format!("falta valor para --{name}"));
            }
        }
        i += 1;
    }
    out
}

fn flag<'a>(flags: &'a [(String, String)], name: &str) -> Option<&'a str> {
    flags.iter().rev().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
}

fn parsed<T: std::str::FromStr>(flags: &[(String, String)], name: &str) -> Option<T> {
    flag(flags, name).map(|v| v.parse::<T>().unwrap_or_else(|_| usage_exit(&format!("--{name} inválido: {v}"))))
}

fn required<T: std::str::FromStr>(flags: &[(String, String)], name: &str) -> T {
    parsed(flags, name).unwrap_or_else(|| usage_exit(&format!("falta --{name}")))
}

fn parse_colors(raw: &str) -> Result<Vec<[u8; 3]>, String> {
    raw.split(';')
       .filter(|c| !c.trim().is_empty())
       .map(|c| {
           let parts: Vec<&str> = c.split(',').map(str::trim).collect();
           match parts.as_slice() {
               [r, g, b] => {
                   let channel = |v: &str| v.parse::<u8>().map_err(|_| format!("canal inválido '{v}' en '{c}'"));
                   Ok([channel(*r)?, channel(*g)?, channel(*b)?])
               }
               _ => Err(format!("color inválido '{c}', se espera r,g,b")),
           }
       })
       .collect()
}

fn request_from(flags: &[(String, String)]) -> AnalysisRequest {
    let nclusters: u32 = required(flags, "clusters");
    let colors = flag(flags, "colors").map(parse_colors)
                                      .unwrap_or_else(|| usage_exit("falta --colors"))
                                      .unwrap_or_else(|e| usage_exit(&e));
    let mut params = KMeansParams::new(nclusters, colors);
    if let Some(c) = flag(flags, "criteria") {
        params.criteria = match c {
            "epsilon" => Criteria::Epsilon,
            "max_iterations" | "max iterations" => Criteria::MaxIterations,
            "all" => Criteria::All,
            other => usage_exit(&format!("--criteria inválido: {other}")),
        };
    }
    if let Some(s) = flag(flags, "seeding") {
        params.seeding = match s {
            "pp" => Seeding::PlusPlus,
            "random" => Seeding::Random,
            other => usage_exit(&format!("--seeding inválido: {other}")),
        };
    }
    if let Some(v) = parsed(flags, "max-iter") {
        params.max_iterations = v;
    }
    if let Some(v) = parsed(flags, "attempts") {
        params.attempts = v;
    }
    if let Some(v) = parsed(flags, "epsilon") {
        params.epsilon = v;
    }
    params.seed = parsed(flags, "seed");
    AnalysisRequest::Kmeans(params)
}

fn exit_code(e: &JobError) -> i32 {
    match e {
        JobError::InvalidParameters(_) => 2,
        JobError::NotFound(_) => 4,
        JobError::AlreadyInFlight { .. } | JobError::QueueRejected(_) | JobError::IllegalTransition { .. } => 4,
        _ => 5,
    }
}

fn fail(e: JobError) -> ! {
    eprintln!("error: {e}");
    std::process::exit(exit_code(&e));
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(e) => {
            eprintln!("[img-cli] serialización: {e}");
            std::process::exit(5);
        }
    }
}

fn wait_terminal(services: &Services, result_id: Uuid, limit: Duration) -> Result<(), JobError> {
    let deadline = Instant::now() + limit;
    loop {
        let record = services.queries().record(result_id)?;
        if record.is_terminal() || Instant::now() >= deadline {
            return Ok(());
        }
        debug!("waiting result_id={} status={}", result_id, record.status());
        std::thread::sleep(Duration::from_millis(100));
    }
}

fn run(cmd: &str, flags: &[(String, String)], services: &Services) -> Result<i32, JobError> {
    match cmd {
        "enqueue" => {
            let dataset: i64 = required(flags, "dataset");
            let image: i64 = required(flags, "image");
            let request = request_from(flags);
            let response = services.orchestrator().enqueue(dataset, image, request)?;
            let Some(result_id) = response.result_id else {
                print_json(&response);
                return Ok(5);
            };
            // El proceso drena el ejecutor al salir: siempre se espera al resultado.
            let secs = parsed::<u64>(flags, "wait").unwrap_or(DEFAULT_WAIT_SECS);
            wait_terminal(services, result_id, Duration::from_secs(secs))?;
            print_json(&services.queries().status(result_id)?);
            let record = services.queries().record(result_id)?;
            Ok(if record.status() == JobStatus::Completed { 0 } else { 1 })
        }
        "status" => {
            let result_id: Uuid = required(flags, "result");
            print_json(&services.queries().status(result_id)?);
            Ok(0)
        }
        "cancel" => {
            let result_id: Uuid = required(flags, "result");
            services.orchestrator().cancel(result_id)?;
            print_json(&services.queries().status(result_id)?);
            Ok(0)
        }
        "download" => {
            let result_id: Uuid = required(flags, "result");
            let out: String = required(flags, "out");
            let download = services.queries().artifact(result_id)?;
            std::fs::write(&out, &download.bytes).map_err(|e| JobError::StorageFault(format!("write {out}: {e}")))?;
            println!("{} -> {} ({} bytes, {})", download.file_name, out, download.bytes.len(), download.content_type);
            Ok(0)
        }
        "list" => {
            let status = flag(flags, "status").map(|s| {
                                                  JobStatus::parse(s).unwrap_or_else(|| usage_exit(&format!("--status inválido: {s}")))
                                              });
            let filter = RecordFilter { status,
                                        dataset_id: parsed(flags, "dataset"),
                                        offset: parsed(flags, "offset").unwrap_or(0),
                                        limit: parsed(flags, "limit").unwrap_or(0) };
            print_json(&services.queries().list_status(&filter)?);
            Ok(0)
        }
        "stats" => {
            print_json(&services.queries().stats()?);
            Ok(0)
        }
        other => usage_exit(&format!("comando desconocido: {other}")),
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 || args[1] == "--help" || args[1] == "help" {
        println!("{USAGE}");
        return;
    }
    let flags = flags(&args);
    let config = AppConfig::from_env().unwrap_or_else(|e| {
                                          eprintln!("[img-cli] configuración: {e}");
                                          std::process::exit(2);
                                      });
    let services = Services::build(config).unwrap_or_else(|e| {
                                              eprintln!("[img-cli] arranque: {e}");
                                              std::process::exit(5);
                                          });
    let code = match run(&args[1], &flags, &services) {
        Ok(code) => code,
        Err(e) => {
            services.shutdown();
            fail(e)
        }
    };
    services.shutdown();
    std::process::exit(code);
}
