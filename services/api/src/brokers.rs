use clap::Args;
use tokio::time::Instant;
use tracing::info;
use vote_receiver::broker::{check_brokers, HealthReport, KafkaMetadataProbe};
use vote_receiver::config::AppConfig;
use vote_receiver::error::AppError;
use vote_receiver::telemetry;

#[derive(Args, Debug, Default)]
pub(crate) struct CheckBrokersArgs {
    /// Comma separated broker list overriding KAFKA_BROKERS
    #[arg(long)]
    pub(crate) brokers: Option<String>,
    /// Topic to verify instead of KAFKA_TOPIC
    #[arg(long)]
    pub(crate) topic: Option<String>,
}

pub(crate) async fn run_check(args: CheckBrokersArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;
    if let Some(brokers) = args.brokers {
        config.kafka.brokers = brokers
            .split(',')
            .map(str::trim)
            .filter(|broker| !broker.is_empty())
            .map(str::to_string)
            .collect();
    }
    if let Some(topic) = args.topic {
        config.kafka.topic = topic;
    }

    telemetry::init(&config.telemetry)?;

    let kafka = &config.kafka;
    info!(brokers = ?kafka.brokers, topic = %kafka.topic, "checking brokers");
    let report = check_brokers(
        &KafkaMetadataProbe,
        &kafka.brokers,
        &kafka.topic,
        kafka.broker_check_timeout,
        Instant::now() + kafka.health_check_timeout,
    )
    .await;

    print!("{}", render_report(&report));
    report.into_verdict(kafka.health_policy)?;
    Ok(())
}

fn render_report(report: &HealthReport) -> String {
    let mut output = format!("Broker health for topic '{}'\n", report.topic);
    for entry in &report.brokers {
        let line = match &entry.result {
            Ok(partitions) => format!("  [ok]   {} ({} partitions)\n", entry.broker, partitions),
            Err(err) => format!("  [fail] {} ({})\n", entry.broker, err),
        };
        output.push_str(&line);
    }
    output.push_str(&format!(
        "{}/{} brokers healthy\n",
        report.healthy(),
        report.total()
    ));
    output
}
