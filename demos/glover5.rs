use loadflow::prelude::*;
use loadflow::testcases::glover_5bus;
use tracing_subscriber::EnvFilter;

macro_rules! timeit {
    ($name:ident, $times:expr, $block:expr) => {{
        use std::time::{Duration, Instant};
        let mut total_duration = Duration::new(0, 0);
        let mut max_duration = Duration::new(0, 0);
        let mut min_duration = Duration::new(u64::MAX, 999_999_999);

        for _ in 0..$times {
            let start_time = Instant::now();
            let _result = $block();
            let duration = start_time.elapsed();

            total_duration += duration;
            max_duration = max_duration.max(duration);
            min_duration = min_duration.min(duration);
        }

        let avg_duration = total_duration / $times;
        println!(
            " {} loops, {} - Average: {:?}, Max: {:?}, Min: {:?}",
            $times,
            stringify!($name),
            avg_duration,
            max_duration,
            min_duration
        );
    }};
}

fn main() -> Result<(), NetworkError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let net = glover_5bus();
    let config = SolverConfig::new(1e-6, 200);

    let mut gs = GaussSeidel::new(config.clone());
    let res = gs.solve(&net)?;
    println!("Gauss-Seidel: {} after {} iterations", res.error, res.iterations);
    println!("{}\n", res.payload);

    for method in [NewtonMethod::Full, NewtonMethod::Decoupled, NewtonMethod::FastDecoupled] {
        let res = NewtonRaphson::new(config.clone(), method).solve(&net)?;
        println!("{method:?}: {} after {} iterations", res.error, res.iterations);
        println!("{}\n", res.payload.bus_table());
    }

    let limited = config.clone().with_q_limit_start_iteration(1);
    let res = NewtonRaphson::full(limited).solve(&net)?;
    println!("limits checked at flat start: {} after {} iterations", res.error, res.iterations);
    println!("{}\n", res.payload.bus_table());

    timeit!(gauss_seidel, 100, || GaussSeidel::new(config.clone()).solve(&net));
    timeit!(newton, 100, || NewtonRaphson::full(config.clone()).solve(&net));
    timeit!(fast_decoupled, 100, || NewtonRaphson::fast_decoupled(config.clone()).solve(&net));
    #[cfg(feature = "rsparse")]
    timeit!(newton_rsparse, 100, || {
        NewtonRaphson::with_solver(
            config.clone(),
            NewtonMethod::Full,
            Box::new(StandardJacobian),
            RSparseSolver::default(),
        )
        .solve(&net)
    });
    Ok(())
}
