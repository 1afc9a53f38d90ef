use crate::connections::PortConnection;
use crate::error::EngineError;
use crate::router::RouterHandle;
use crate::topology::Topology;
use crate::transport::{Markers, TransportPositions};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use tracing::info;

/// Persisted routing and transport markers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    #[serde(default)]
    pub transport: TransportPositions,
    #[serde(default)]
    pub markers: Markers,
    #[serde(default)]
    pub connections: Vec<PortConnection>,
}

impl SessionState {
    pub fn capture(topology: &Topology, transport: TransportPositions, markers: Markers) -> Self {
        Self {
            transport,
            markers,
            connections: topology.connections().connections().to_vec(),
        }
    }

    pub fn from_json(text: &str) -> Result<Self, EngineError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, EngineError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let file = File::open(path.as_ref())?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), EngineError> {
        let mut writer = BufWriter::new(File::create(path.as_ref())?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        info!(
            "Saved session with {} connection(s) to {}",
            self.connections.len(),
            path.as_ref().display()
        );
        Ok(())
    }

    /// Replaces the topology's connections and publishes the resulting graph
    /// before returning. On error the topology is left untouched.
    pub async fn restore(
        &self,
        topology: &mut Topology,
        router: &RouterHandle,
    ) -> Result<(), EngineError> {
        topology.load_connections(self.connections.clone())?;
        router.recalc_graph(topology, false)?.wait().await
    }
}
