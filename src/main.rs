use anyhow::{anyhow, bail, Result};
use clap::{Parser, ValueEnum};
use crossbeam::channel::{self, Sender};
use health_tracker::listener::{BatchParser, HeartRateListener, SensorListener};
use health_tracker::vendor::sim::SimulatedService;
use health_tracker::{
    ConnectionEvent, EcgListener, EcgMeasurement, EcgProgress, HealthTrackerType, Looper,
    PpgDataSaver, PpgListener, SensorReading, SessionSummary, SkinTemperatureListener,
    SpO2Listener, TrackerConfig, TrackerConnection, TrackerDataSubject, TrackerErrorKind,
    TrackerObserver,
};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Sensor {
    Ecg,
    Ppg,
    SkinTemp,
    Spo2,
    HeartRate,
}

impl Sensor {
    fn tracker_type(self) -> HealthTrackerType {
        match self {
            Sensor::Ecg => HealthTrackerType::EcgOnDemand,
            Sensor::Ppg => HealthTrackerType::PpgContinuous,
            Sensor::SkinTemp => HealthTrackerType::SkinTemperatureOnDemand,
            Sensor::Spo2 => HealthTrackerType::Spo2OnDemand,
            Sensor::HeartRate => HealthTrackerType::HeartRateContinuous,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "health_tracker")]
#[command(about = "Run one wearable sensor against the simulated health tracking service", long_about = None)]
struct Args {
    /// Sensor to run
    #[arg(value_enum, default_value = "ppg")]
    sensor: Sensor,

    /// Duration in seconds (ECG: measurement window)
    #[arg(long, default_value = "10")]
    duration: u64,

    /// Output directory (overrides the config file)
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// JSON config file
    #[arg(long)]
    config: Option<PathBuf>,
}

/// Prints readings and collects what gets saved at the end of the run
struct ConsoleObserver {
    summary: Mutex<SessionSummary>,
    ppg: Mutex<PpgDataSaver>,
    ecg_done: Sender<EcgProgress>,
}

impl ConsoleObserver {
    fn summary(&self) -> MutexGuard<'_, SessionSummary> {
        self.summary.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ppg(&self) -> MutexGuard<'_, PpgDataSaver> {
        self.ppg.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TrackerObserver for ConsoleObserver {
    fn on_reading(&self, reading: &SensorReading) {
        match reading {
            SensorReading::Ecg(ecg) if ecg.lead_off => println!("ECG   lead off"),
            SensorReading::Ecg(ecg) => println!(
                "ECG   {:.3} mV ({} samples)",
                ecg.average_millivolts, ecg.sample_count
            ),
            SensorReading::Ppg(ppg) => {
                println!(
                    "PPG   green={} ir={} red={} status={}",
                    ppg.green.len(),
                    ppg.ir.len(),
                    ppg.red.len(),
                    ppg.status
                );
                self.ppg().add_ppg_data(ppg.clone());
            }
            SensorReading::SkinTemperature(t) => println!(
                "TEMP  status={} ambient={:.2}°C wrist={:.2}°C",
                t.status, t.ambient_celsius, t.wrist_celsius
            ),
            SensorReading::SpO2(s) => println!("SPO2  status={} value={}%", s.status, s.spo2),
            SensorReading::HeartRate(hr) => println!(
                "HR    {} bpm ibi={} ms quality={}",
                hr.heart_rate, hr.ibi, hr.ibi_quality
            ),
        }
        self.summary().record(reading);
    }

    fn on_tracker_error(&self, error: TrackerErrorKind) {
        log::error!("Tracker error: {:?}", error);
        self.summary().record_error(error);
    }

    fn on_ecg_progress(&self, progress: &EcgProgress) {
        match progress {
            EcgProgress::LeadOff { seconds_left } => {
                println!("ECG   place your finger on the key ({}s left)", seconds_left)
            }
            EcgProgress::Measuring {
                seconds_left,
                average_millivolts,
            } => println!("ECG   {:.3} mV ({}s left)", average_millivolts, seconds_left),
            EcgProgress::Completed { average_millivolts } => {
                println!("ECG   measurement complete: {:.3} mV", average_millivolts)
            }
            EcgProgress::Failed => println!("ECG   measurement failed"),
        }
        if progress.is_final() {
            let _ = self.ecg_done.try_send(progress.clone());
        }
    }
}

/// Measurement window for `--duration` seconds; at least one second
fn ecg_window_ms(duration_secs: u64) -> u64 {
    duration_secs.max(1).saturating_mul(1000)
}

fn run_listener<P: BatchParser>(listener: SensorListener<P>, run_for: Duration) {
    listener.start();
    thread::sleep(run_for);
    listener.flush();
    listener.wait_idle(Duration::from_secs(1));
    listener.stop();
    log::info!(
        "{:?}: {} batches received",
        listener.tracker_type(),
        listener.batches_received()
    );
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => TrackerConfig::load(path)?,
        None => TrackerConfig::default(),
    };
    if let Some(dir) = args.output_dir {
        config.output_dir = dir;
    }
    let tracker_type = args.sensor.tracker_type();

    log::info!("Health tracker demo: {:?} for {}s", tracker_type, args.duration);
    log::info!("Output directory: {}", config.output_dir.display());

    // ─── Connect ─────────────────────────────────────────────────────────────

    let service = Arc::new(SimulatedService::with_all_trackers());
    let (conn_tx, conn_rx) = channel::unbounded::<ConnectionEvent>();
    let connection = TrackerConnection::new(
        service.clone(),
        Arc::new(move |event: &ConnectionEvent| {
            let _ = conn_tx.send(event.clone());
        }),
    );
    connection.connect()?;

    match conn_rx.recv_timeout(Duration::from_secs(5))? {
        ConnectionEvent::Connected { capability } => {
            log::info!("Supported trackers: {:?}", capability.supported().collect::<Vec<_>>())
        }
        ConnectionEvent::Failed { error, message, .. } => {
            bail!("Connection failed: {:?} {}", error, message.unwrap_or_default())
        }
        ConnectionEvent::Disconnected => bail!("Service disconnected before connecting"),
    }
    if !connection.is_capable(tracker_type) {
        bail!("{:?} is not supported by this device", tracker_type);
    }

    // ─── Run ─────────────────────────────────────────────────────────────────

    let looper = Looper::spawn("main-looper")?;
    let subject = Arc::new(TrackerDataSubject::new());
    let (done_tx, done_rx) = channel::bounded::<EcgProgress>(1);
    let console = Arc::new(ConsoleObserver {
        summary: Mutex::new(SessionSummary::new(tracker_type)),
        ppg: Mutex::new(PpgDataSaver::new(&config.output_dir)),
        ecg_done: done_tx,
    });
    subject.add_observer(console.clone());

    let sim_tracker = service
        .tracker(tracker_type)
        .ok_or_else(|| anyhow!("No simulated tracker for {:?}", tracker_type))?;
    let feed = sim_tracker.spawn_feed(config.feed_interval(), config.batch_size)?;
    let run_for = Duration::from_secs(args.duration);

    match args.sensor {
        Sensor::Ecg => {
            let mut ecg = config.ecg;
            ecg.duration_ms = ecg_window_ms(args.duration);
            ecg.warmup_ms = ecg.warmup_ms.min(ecg.duration_ms / 2);
            let listener = Arc::new(EcgListener::attach(&connection, subject.clone(), &looper)?);
            let measurement = EcgMeasurement::new(listener, subject.clone(), ecg);
            measurement.start()?;
            match done_rx.recv_timeout(ecg.duration() + Duration::from_secs(5)) {
                Ok(result) => log::info!("ECG result: {:?}", result),
                Err(_) => log::warn!("ECG measurement did not finish in time"),
            }
            measurement.cancel();
        }
        Sensor::Ppg => run_listener(PpgListener::attach(&connection, subject.clone(), &looper)?, run_for),
        Sensor::SkinTemp => run_listener(
            SkinTemperatureListener::attach(&connection, subject.clone(), &looper)?,
            run_for,
        ),
        Sensor::Spo2 => run_listener(SpO2Listener::attach(&connection, subject.clone(), &looper)?, run_for),
        Sensor::HeartRate => run_listener(
            HeartRateListener::attach(&connection, subject.clone(), &looper)?,
            run_for,
        ),
    }

    feed.stop();
    connection.disconnect();

    // ─── Save ────────────────────────────────────────────────────────────────

    let ppg_file = console.ppg().save_to_file()?;
    let mut summary = console.summary().clone();
    summary.ppg_file = ppg_file;
    println!("\n{} readings, {} errors", summary.readings, summary.errors.len());
    summary.save(&config.output_dir)?;

    looper.quit();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ecg_window_saturates() {
        assert_eq!(ecg_window_ms(0), 1_000);
        assert_eq!(ecg_window_ms(30), 30_000);
        assert_eq!(ecg_window_ms(u64::MAX), u64::MAX);
    }

    #[test]
    fn test_huge_duration_is_accepted() {
        let args = Args::try_parse_from(["health_tracker", "ecg", "--duration", "18446744073709551615"])
            .unwrap();
        assert_eq!(args.sensor, Sensor::Ecg);
        assert_eq!(ecg_window_ms(args.duration), u64::MAX);
    }
}
