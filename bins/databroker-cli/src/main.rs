use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use databroker_client::{
    BrokerError, Connection, Connector, MemoryBroker, NodeListener, PathListener,
};
use databroker_core::{
    Branch, ConnectorConfig, DataPoint, DataType, EntryType, EntryUpdate, Field, Leaf,
    MemoryStore, SignalNode, SignalPath,
};
use databroker_protocol::parse_datapoint;

#[derive(Parser)]
#[command(name = "databroker", version, about = "Talk to a signal databroker")]
struct Cli {
    /// Connector settings as JSON
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bearer token attached to every call
    #[arg(long)]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Subscribe to the demo vehicle and print updates until Ctrl+C
    Demo,
    /// Read a signal or a whole branch
    Read {
        path: String,
        #[arg(long, value_enum, default_value_t = FieldArg::Value)]
        field: FieldArg,
    },
    /// Write a signal; the value is parsed using the declared type
    Write {
        path: String,
        value: String,
        #[arg(long, value_enum, default_value_t = FieldArg::Value)]
        field: FieldArg,
        /// VSS type name overriding the declared type, e.g. "uint8" or "float[]"
        #[arg(long = "type")]
        data_type: Option<DataType>,
    },
    /// Read a branch into the local tree and print its leaves
    Tree { path: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum FieldArg {
    Value,
    ActuatorTarget,
    Metadata,
}

impl From<FieldArg> for Field {
    fn from(field: FieldArg) -> Self {
        match field {
            FieldArg::Value => Field::Value,
            FieldArg::ActuatorTarget => Field::ActuatorTarget,
            FieldArg::Metadata => Field::Metadata,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,databroker_client=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ConnectorConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ConnectorConfig::default(),
    };
    if let Some(token) = cli.token {
        config = config.with_token(token);
    }

    let tree = demo_tree()?;
    let mut store = MemoryStore::new();
    store.declare_tree(&tree);
    let mut broker = MemoryBroker::new(store);
    if let Some(token) = &config.token {
        broker = broker.with_required_token(token.clone());
    }
    let broker = Arc::new(broker);

    let connection = Connector::new(broker.clone())
        .with_config(config)
        .connect()
        .await?;
    connection.register_disconnect_listener(Arc::new(|| {
        tracing::info!("Disconnected from broker");
    }));

    match cli.command {
        Command::Demo => run_demo(&connection, broker, &tree).await?,
        Command::Read { path, field } => {
            let path = SignalPath::new(&path)?;
            let response = connection.read(&path, &[field.into()]).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Command::Write {
            path,
            value,
            field,
            data_type,
        } => {
            let path = SignalPath::new(&path)?;
            let data_type = match data_type {
                Some(data_type) => data_type,
                None => declared_type(&tree, &path)?,
            };
            let datapoint = parse_datapoint(data_type, &value)?;
            let response = connection.write(&path, &[field.into()], &datapoint).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Command::Tree { path } => {
            let path = SignalPath::new(&path)?;
            let node = tree
                .find(&path)
                .with_context(|| format!("{path} is not part of the vehicle model"))?;
            let node = connection.read_node(node, &[Field::Value]).await?;
            for leaf in node.leaves() {
                println!("{leaf}");
            }
        }
    }

    connection.disconnect();
    Ok(())
}

/// Look up the declared type of a leaf in the local model.
fn declared_type(tree: &SignalNode, path: &SignalPath) -> anyhow::Result<DataType> {
    match tree.find(path) {
        Some(SignalNode::Leaf(leaf)) => Ok(leaf.data_type),
        Some(SignalNode::Branch(_)) => anyhow::bail!("{path} is a branch"),
        None => anyhow::bail!("{path} is not part of the vehicle model"),
    }
}

fn demo_tree() -> anyhow::Result<SignalNode> {
    let path = |s: &str| SignalPath::new(s);
    Ok(Branch::new(
        path("Vehicle")?,
        vec![
            Leaf::new(path("Vehicle.Speed")?, DataType::Float, EntryType::Sensor)
                .with_description("Vehicle speed in km/h")
                .into(),
            Branch::new(
                path("Vehicle.Body")?,
                vec![
                    Leaf::new(
                        path("Vehicle.Body.Horn.IsActive")?,
                        DataType::Bool,
                        EntryType::Actuator,
                    )
                    .into(),
                    Leaf::new(
                        path("Vehicle.Body.Lights.Beam.Low.IsOn")?,
                        DataType::Bool,
                        EntryType::Actuator,
                    )
                    .into(),
                ],
            )
            .into(),
            Leaf::new(
                path("Vehicle.VehicleIdentification.VIN")?,
                DataType::String,
                EntryType::Attribute,
            )
            .into(),
        ],
    )
    .with_description("High-level vehicle data")
    .into())
}

struct PrintingListener;

impl PathListener for PrintingListener {
    fn on_entry_changed(&self, updates: &[EntryUpdate]) {
        for update in updates {
            if let Some(value) = &update.entry.value {
                tracing::info!("{} -> {}", update.entry.path, value);
            }
        }
    }

    fn on_error(&self, error: &BrokerError) {
        tracing::error!("Subscription error: {}", error);
    }
}

struct TreePrinter;

impl NodeListener for TreePrinter {
    fn on_node_changed(&self, node: &SignalNode) {
        let leaves: Vec<String> = node.leaves().iter().map(|leaf| leaf.to_string()).collect();
        tracing::info!("{} changed: {}", node.path(), leaves.join(", "));
    }

    fn on_error(&self, error: &BrokerError) {
        tracing::error!("Tree subscription error: {}", error);
    }
}

async fn run_demo(
    connection: &Connection,
    broker: Arc<MemoryBroker>,
    tree: &SignalNode,
) -> anyhow::Result<()> {
    let speed = SignalPath::new("Vehicle.Speed")?;
    connection
        .subscribe(&speed, Field::Value, Arc::new(PrintingListener))
        .await?;

    let body = tree
        .find(&SignalPath::new("Vehicle.Body")?)
        .context("demo tree has no body")?;
    connection
        .subscribe_node(body, Field::Value, Arc::new(TreePrinter))
        .await?;

    let demo_handle = tokio::spawn(generate_demo_data(broker));

    tracing::info!("Demo running, press Ctrl+C to stop");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl+C, shutting down...");
        }
        _ = demo_handle => {
            tracing::warn!("Demo data generator stopped");
        }
    }
    Ok(())
}

/// Feed the broker the way a vehicle data provider would.
async fn generate_demo_data(broker: Arc<MemoryBroker>) {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    let paths = (
        SignalPath::new("Vehicle.Speed"),
        SignalPath::new("Vehicle.Body.Horn.IsActive"),
        SignalPath::new("Vehicle.Body.Lights.Beam.Low.IsOn"),
    );
    let (Ok(speed), Ok(horn), Ok(low_beam)) = paths else {
        tracing::error!("Invalid demo paths");
        return;
    };

    let mut tick: u32 = 0;
    loop {
        interval.tick().await;
        tick += 1;

        let kmh = 50.0 + (tick as f32 / 5.0).sin() * 20.0;
        let updates = [
            (&speed, DataPoint::Float(kmh)),
            (&horn, DataPoint::Bool(tick % 7 == 0)),
            (&low_beam, DataPoint::Bool(tick % 20 < 10)),
        ];
        for (path, value) in updates {
            if let Err(e) = broker.publish(path, Field::Value, value).await {
                tracing::error!("Failed to publish {}: {}", path, e);
                return;
            }
        }
    }
}
