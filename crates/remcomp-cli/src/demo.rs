//! Round trip of one scalar, one vector and one matrix through a kernel.

use anyhow::{ensure, Context, Result};
use remcomp_core::{KernelTransport, RemoteVariableClient, VariableType};
use std::f64::consts::PI;
use tracing::info;

/// Values read back from the kernel.
#[derive(Debug, PartialEq)]
pub struct DemoReport {
    pub scalar: f64,
    pub vector: Vec<f64>,
    pub matrix: Vec<Vec<f64>>,
    pub named: f64,
}

impl std::fmt::Display for DemoReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "pi = {}", self.scalar)?;
        writeln!(f, "twoTimesPi = {:?}", self.vector)?;
        writeln!(f, "matrix =")?;
        for row in &self.matrix {
            writeln!(f, "  {:?}", row)?;
        }
        write!(f, "named pi = {}", self.named)
    }
}

pub async fn run<T: KernelTransport>(client: &RemoteVariableClient<T>) -> Result<DemoReport> {
    client.reset().await.context("initial reset failed")?;

    let matrix_in: Vec<Vec<f64>> = vec![vec![1.0, 2.0], vec![3.0, 4.0]];

    let scalar_id = client.allocate(VariableType::Float64, &[]).await?;
    let vector_id = client.allocate(VariableType::Float64, &[2]).await?;
    let matrix_id = client.allocate(VariableType::Float64, &[2, 2]).await?;

    client.send(scalar_id, &PI).await?;
    client.send(vector_id, &vec![PI, PI]).await?;
    client.send(matrix_id, &matrix_in).await?;
    info!("Sent scalar, vector and matrix");

    let report = DemoReport {
        scalar: client.recv_scalar(scalar_id).await?,
        vector: client.recv_vector(vector_id).await?,
        matrix: client.recv_matrix(matrix_id).await?,
        named: {
            client.send_variable("pi", &PI).await?;
            client.get_variable("pi").await?
        },
    };
    ensure!(
        report.matrix == matrix_in,
        "matrix came back as {:?}",
        report.matrix
    );

    for id in [scalar_id, vector_id, matrix_id] {
        client.free(id).await?;
    }
    client.reset().await.context("final reset failed")?;

    Ok(report)
}
