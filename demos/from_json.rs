use std::env;
use std::process::ExitCode;

use loadflow::prelude::*;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let Some(path) = env::args().nth(1) else {
        eprintln!("usage: from_json <case.json> [gauss_seidel|newton_raphson|decoupled|fast_decoupled]");
        return ExitCode::FAILURE;
    };
    let method = match env::args().nth(2).as_deref() {
        None | Some("newton_raphson") => Method::NewtonRaphson,
        Some("gauss_seidel") => Method::GaussSeidel,
        Some("decoupled") => Method::Decoupled,
        Some("fast_decoupled") => Method::FastDecoupled,
        Some(other) => {
            eprintln!("unknown method `{other}`");
            return ExitCode::FAILURE;
        }
    };

    let case = match load_case(&path) {
        Ok(case) => case,
        Err(err) => {
            eprintln!("{path}: {err}");
            return ExitCode::FAILURE;
        }
    };
    let res = match method.solver(case.config).solve(&case.network) {
        Ok(res) => res,
        Err(err) => {
            eprintln!("{path}: {err}");
            return ExitCode::FAILURE;
        }
    };
    println!("{}", res.payload);
    match res.into_result() {
        Ok(_) => ExitCode::SUCCESS,
        Err(failure) => {
            eprintln!("{failure}");
            ExitCode::FAILURE
        }
    }
}
