use a3c::{env::Catch, panic_hook, Architecture, Config, LearningRate, A3C};
use log::info;
use tch::Device;

const STEP_COUNT: usize = 200_000;
const EVAL_INTERVAL: usize = 5000;

fn main() -> Result<(), a3c::Error> {
    env_logger::init();
    panic_hook::init();

    let config = Config::default()
        .device(Device::cuda_if_available())
        .architecture(Architecture::Nips)
        .history_len(4)
        .gamma(0.99);

    let mut a3c = A3C::builder()
        .env(Catch::<32>::new())
        .config(config)
        .learning_rate(LearningRate::Linear {
            start: 7e-4,
            end: 0.0,
            total_steps: STEP_COUNT,
        })
        .t_max(5)
        .num_threads(8)
        .build()?;

    while a3c.global_step() < STEP_COUNT {
        a3c.train(EVAL_INTERVAL)?;
        let avg_return = a3c.evaluate_avg_return()?;

        info!(
            global_step = a3c.global_step(),
            updates = a3c.global().update_count();
            "average return {avg_return}"
        );
    }

    Ok(())
}
