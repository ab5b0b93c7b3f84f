use std::{
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
};

use crossbeam::channel::{self, Receiver, Sender};
use derive_setters::Setters;
use log::{debug, error, info};

use crate::{
    action::{ActionSelector, Greedy, Sampling},
    config::Config,
    env::{Env as EnvTrait, FrameHistory},
    error::{Error, Result},
    model::{ConvActorCritic, ObservationShape},
    runner::ModelRunner,
    schedule::LearningRate,
    shared::GlobalParameters,
    trajectory::{Step, Trajectory},
};

const EVAL_EPISODE_COUNT: u8 = 20;

enum Broadcast {
    Train(usize),
    Terminate,
}

enum Report {
    Done { steps: usize },
    Failed(Error),
}

struct WorkerHandle {
    broadcaster: Sender<Broadcast>,
    thread: thread::JoinHandle<()>,
    /// Set once the worker reported a failure; it exits right after.
    failed: bool,
}

#[must_use]
pub struct A3C<Env>
where
    Env: EnvTrait,
{
    evaluator: ModelRunner<ConvActorCritic>,
    eval_env: Env,
    history_len: usize,
    global_step: Arc<AtomicUsize>,
    workers: Vec<WorkerHandle>,
    reports: Receiver<(usize, Report)>,
}

impl<Env> Drop for A3C<Env>
where
    Env: EnvTrait,
{
    fn drop(&mut self) {
        for worker in &self.workers {
            let _ = worker.broadcaster.send(Broadcast::Terminate);
        }

        for (thread_no, worker) in self.workers.drain(..).enumerate() {
            if worker.thread.join().is_err() {
                error!(worker = thread_no; "worker thread panicked");
            }
        }
    }
}

impl<Env> A3C<Env>
where
    Env: EnvTrait,
{
    /// Lets every worker run at least `min_steps` environment steps and
    /// returns once all of them have reported back.
    pub fn train(&mut self, min_steps: usize) -> Result<()> {
        let mut disconnected = None;
        let mut running = 0;
        for (thread_no, worker) in self.workers.iter().enumerate() {
            if worker.failed || worker.broadcaster.send(Broadcast::Train(min_steps)).is_err() {
                disconnected.get_or_insert(Error::WorkerDisconnected(thread_no));
            } else {
                running += 1;
            }
        }

        // Every worker that got the message reports back, even when another
        // one is gone, so no report is left over for the next round.
        let mut failure = None;
        for _ in 0..running {
            let (thread_no, report) = self
                .reports
                .recv()
                .map_err(|_| Error::AllWorkersDisconnected)?;

            match report {
                Report::Done { steps } => {
                    debug!(worker = thread_no, steps = steps; "worker finished round");
                }
                Report::Failed(source) => {
                    error!(worker = thread_no; "worker failed: {source}");
                    if let Some(worker) = self.workers.get_mut(thread_no) {
                        worker.failed = true;
                    }
                    failure.get_or_insert(Error::Worker {
                        worker: thread_no,
                        source: Box::new(source),
                    });
                }
            }
        }

        match failure.or(disconnected) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Plays greedy episodes with the current global parameters.
    pub fn evaluate_avg_return(&mut self) -> Result<f32> {
        self.evaluator.sync()?;

        let mut total_return = 0.0;
        for _ in 0..EVAL_EPISODE_COUNT {
            self.eval_env.reset();
            let mut history = FrameHistory::new(self.history_len, &self.eval_env.frame());

            while !self.eval_env.episode_ended() {
                let policy = self.evaluator.predict(&history.state()?)?;
                let action = Greedy.select(&policy)?;
                total_return += self.eval_env.step(action);
                history.push(self.eval_env.frame());
            }
        }

        Ok(total_return / f32::from(EVAL_EPISODE_COUNT))
    }

    /// Environment steps taken so far, across all workers.
    #[must_use]
    pub fn global_step(&self) -> usize {
        self.global_step.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn global(&self) -> &Arc<GlobalParameters> {
        self.evaluator.global()
    }

    pub fn builder() -> Builder<Env> {
        Builder {
            config: None,
            env: None,
            learning_rate: None,
            t_max: None,
            num_threads: None,
        }
    }
}

/// The ACT, OBSERVE, TRAIN and SYNC loop of one thread.
struct Worker<Env>
where
    Env: EnvTrait,
{
    thread_no: usize,
    runner: ModelRunner<ConvActorCritic>,
    env: Env,
    history: FrameHistory,
    selector: Sampling,
    learning_rate: LearningRate,
    t_max: usize,
    global_step: Arc<AtomicUsize>,
    episode_return: f32,
}

impl<Env> Worker<Env>
where
    Env: EnvTrait,
{
    fn collect(&mut self) -> Result<Trajectory> {
        let mut trajectory = Trajectory::with_capacity(self.t_max);

        while !self.env.episode_ended() && trajectory.len() < self.t_max {
            let prestate = self.history.state()?;
            let (policy, predicted_value) = self.runner.predict_action_state(&prestate)?;
            let action = self.selector.select(&policy)?;

            let reward = self.env.step(action);
            self.history.push(self.env.frame());
            self.episode_return += reward;

            trajectory.push(Step {
                prestate,
                predicted_value,
                action,
                reward,
                terminal: self.env.episode_ended(),
            });
        }

        let bootstrap_value = if trajectory.ends_episode() {
            0.0
        } else {
            self.runner.predict_state(&self.history.state()?)?
        };
        trajectory.set_bootstrap_value(bootstrap_value);

        Ok(trajectory)
    }

    fn run(&mut self, min_steps: usize) -> Result<usize> {
        let mut steps_done = 0;

        while steps_done < min_steps {
            let trajectory = self.collect()?;
            let len = trajectory.len();
            steps_done += len;

            let step = self.global_step.fetch_add(len, Ordering::Relaxed);
            self.runner
                .train(trajectory, self.learning_rate.at(step))?;

            if self.env.episode_ended() {
                info!(
                    worker = self.thread_no,
                    global_step = step + len;
                    "episode return {}",
                    self.episode_return
                );
                self.episode_return = 0.0;
                self.env.reset();
                self.history.reset(&self.env.frame());
            }
        }

        Ok(steps_done)
    }
}

struct TrainingThreadOptions<'a, Env>
where
    Env: EnvTrait,
{
    thread_no: usize,
    config: Config,
    global: &'a Arc<GlobalParameters>,
    env: &'a Env,
    learning_rate: LearningRate,
    t_max: usize,
    global_step: &'a Arc<AtomicUsize>,
    reports: &'a Sender<(usize, Report)>,
}

fn observation_shape<Env>(history_len: usize) -> ObservationShape
where
    Env: EnvTrait,
{
    let (height, width) = Env::frame_shape();
    ObservationShape {
        height,
        width,
        history_len,
    }
}

fn new_model<Env>(config: &Config) -> Result<ConvActorCritic>
where
    Env: EnvTrait,
{
    ConvActorCritic::new(
        config.device,
        config.architecture,
        observation_shape::<Env>(config.history_len),
        Env::action_space(),
    )
}

fn spawn_training_thread<Env>(
    TrainingThreadOptions {
        thread_no,
        config,
        global,
        env,
        learning_rate,
        t_max,
        global_step,
        reports,
    }: TrainingThreadOptions<Env>,
) -> Result<WorkerHandle>
where
    Env: EnvTrait,
{
    let (broadcaster, broadcast_rx) = channel::unbounded();

    let mut local_env = env.clone();
    let global = Arc::clone(global);
    let global_step = Arc::clone(global_step);
    let reports = reports.clone();

    let thread = thread::Builder::new()
        .name(format!("a3c-worker-{thread_no}"))
        .spawn(move || {
            let init = panic::catch_unwind(AssertUnwindSafe(|| -> Result<Worker<Env>> {
                let runner = new_model::<Env>(&config)
                    .and_then(|model| ModelRunner::new(thread_no, model, global, &config))?;

                local_env.reset();
                let history = FrameHistory::new(config.history_len, &local_env.frame());

                Ok(Worker {
                    thread_no,
                    runner,
                    env: local_env,
                    history,
                    selector: Sampling::new(),
                    learning_rate,
                    t_max,
                    global_step,
                    episode_return: 0.0,
                })
            }));

            let mut worker = match init.unwrap_or(Err(Error::WorkerPanicked)) {
                Ok(worker) => worker,
                Err(err) => {
                    let _ = reports.send((thread_no, Report::Failed(err)));
                    return;
                }
            };

            while let Ok(msg) = broadcast_rx.recv() {
                match msg {
                    Broadcast::Train(min_steps) => {
                        let outcome = panic::catch_unwind(AssertUnwindSafe(|| worker.run(min_steps)))
                            .unwrap_or(Err(Error::WorkerPanicked));

                        match outcome {
                            Ok(steps) => {
                                let _ = reports.send((thread_no, Report::Done { steps }));
                            }
                            Err(err) => {
                                let _ = reports.send((thread_no, Report::Failed(err)));
                                break;
                            }
                        }
                    }
                    Broadcast::Terminate => {
                        break;
                    }
                }
            }

            debug!(worker = thread_no; "worker stopped");
        })?;

    Ok(WorkerHandle {
        broadcaster,
        thread,
        failed: false,
    })
}

#[must_use]
#[derive(Setters, Debug)]
#[setters(strip_option)]
pub struct Builder<Env>
where
    Env: EnvTrait,
{
    config: Option<Config>,
    env: Option<Env>,
    learning_rate: Option<LearningRate>,
    /// Maximum number of steps per trajectory.
    t_max: Option<usize>,
    num_threads: Option<usize>,
}

impl<Env> Builder<Env>
where
    Env: EnvTrait,
{
    pub fn build(self) -> Result<A3C<Env>> {
        let config = self.config.unwrap_or_default();
        let learning_rate = self.learning_rate.unwrap_or_default();
        let t_max = self.t_max.ok_or(Error::MissingSetting("t_max"))?;
        let num_threads = self.num_threads.ok_or(Error::MissingSetting("num_threads"))?;
        let mut env = self.env.ok_or(Error::MissingSetting("env"))?;

        for (name, value) in [
            ("t_max", t_max),
            ("num_threads", num_threads),
            ("history_len", config.history_len),
        ] {
            if value == 0 {
                return Err(Error::InvalidSetting(name));
            }
        }
        env.reset();

        let global_model = new_model::<Env>(&config)?;
        let global = Arc::new(GlobalParameters::from_model(
            &global_model,
            config.optimizer,
        ));
        let evaluator = ModelRunner::new(num_threads, global_model, Arc::clone(&global), &config)?;

        let global_step = Arc::new(AtomicUsize::new(0));
        let (reports_tx, reports) = channel::unbounded();

        let mut workers = Vec::with_capacity(num_threads);
        for thread_no in 0..num_threads {
            let worker = spawn_training_thread(TrainingThreadOptions {
                thread_no,
                config,
                global: &global,
                env: &env,
                learning_rate,
                t_max,
                global_step: &global_step,
                reports: &reports_tx,
            })?;

            workers.push(worker);
        }

        info!(
            threads = num_threads,
            variables = global.len();
            "spawned A3C workers"
        );

        Ok(A3C {
            evaluator,
            eval_env: env,
            history_len: config.history_len,
            global_step,
            workers,
            reports,
        })
    }
}
