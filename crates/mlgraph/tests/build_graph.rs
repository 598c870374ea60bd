//! Builder and compilation behavior through the public API.

use anyhow::Result;
use mlgraph::ops::{ArgMinMaxOptions, Conv2dOptions, GemmOptions, Pool2dOptions, ReduceOptions};
use mlgraph::{
    Context, ContextOptions, DataType, DeviceType, GraphBuilder, GraphError, OperandDescriptor,
};
use mlgraph_backend_ref_cpu::CpuBackend;
use std::sync::Arc;

fn f32_desc(dims: &[u32]) -> OperandDescriptor {
    OperandDescriptor::new(DataType::F32, dims.to_vec())
}

#[test]
fn add_broadcasts_right_aligned() -> Result<()> {
    let mut builder = GraphBuilder::new();
    let a = builder.input("a", f32_desc(&[3, 1, 5]))?;
    let b = builder.input("b", f32_desc(&[4, 5]))?;
    let sum = builder.add(&a, &b)?;
    assert_eq!(sum.shape(), &[3, 4, 5]);
    assert_eq!(sum.data_type(), DataType::F32);
    Ok(())
}

#[test]
fn incompatible_broadcast_appends_no_node() -> Result<()> {
    let mut builder = GraphBuilder::new();
    let a = builder.input("a", f32_desc(&[3, 4]))?;
    let b = builder.input("b", f32_desc(&[5, 4]))?;
    assert!(matches!(
        builder.add(&a, &b),
        Err(GraphError::ShapeMismatch(_))
    ));
    assert_eq!(builder.node_count(), 0);
    Ok(())
}

#[test]
fn reduce_sum_axis_shapes() -> Result<()> {
    let mut builder = GraphBuilder::new();
    let x = builder.input("x", f32_desc(&[2, 3, 4]))?;
    let dropped = builder.reduce_sum(
        &x,
        ReduceOptions {
            axes: Some(vec![1]),
            keep_dimensions: false,
        },
    )?;
    assert_eq!(dropped.shape(), &[2, 4]);
    let kept = builder.reduce_sum(
        &x,
        ReduceOptions {
            axes: Some(vec![1]),
            keep_dimensions: true,
        },
    )?;
    assert_eq!(kept.shape(), &[2, 1, 4]);
    Ok(())
}

#[test]
fn conv2d_default_options_shape() -> Result<()> {
    let mut builder = GraphBuilder::new();
    let input = builder.input("input", f32_desc(&[1, 3, 8, 8]))?;
    let filter = builder.input("filter", f32_desc(&[4, 3, 3, 3]))?;
    let out = builder.conv2d(&input, &filter, None, Conv2dOptions::default())?;
    assert_eq!(out.shape(), &[1, 4, 6, 6]);
    Ok(())
}

#[test]
fn max_pool_and_gemm_shapes() -> Result<()> {
    let mut builder = GraphBuilder::new();
    let x = builder.input("x", f32_desc(&[1, 2, 4, 4]))?;
    let pooled = builder.max_pool2d(
        &x,
        Pool2dOptions {
            window_dimensions: Some([2, 2]),
            strides: [2, 2],
            ..Default::default()
        },
    )?;
    assert_eq!(pooled.shape(), &[1, 2, 2, 2]);

    let a = builder.input("a", f32_desc(&[2, 3]))?;
    let b = builder.input("b", f32_desc(&[3, 4]))?;
    let c = builder.input("c", f32_desc(&[4]))?;
    let out = builder.gemm(&a, &b, Some(&c), GemmOptions::default())?;
    assert_eq!(out.shape(), &[2, 4]);
    Ok(())
}

#[test]
fn arg_max_yields_i64_indices() -> Result<()> {
    let mut builder = GraphBuilder::new();
    let x = builder.input("x", f32_desc(&[5, 2]))?;
    let indices = builder.arg_max(
        &x,
        ArgMinMaxOptions {
            axes: Some(vec![0]),
            ..Default::default()
        },
    )?;
    assert_eq!(indices.data_type(), DataType::I64);
    assert_eq!(indices.shape(), &[2]);
    Ok(())
}

#[test]
fn operands_from_another_builder_are_foreign() -> Result<()> {
    let mut theirs = GraphBuilder::new();
    let foreign = theirs.input("x", f32_desc(&[2]))?;
    let mut ours = GraphBuilder::new();
    let local = ours.input("x", f32_desc(&[2]))?;
    assert!(matches!(
        ours.add(&local, &foreign),
        Err(GraphError::UnknownOperand)
    ));
    Ok(())
}

#[tokio::test]
async fn build_drops_dead_nodes() -> Result<()> {
    let mut builder = GraphBuilder::new();
    let x = builder.input("x", f32_desc(&[2, 2]))?;
    let live = builder.relu(&x)?;
    let dead = builder.neg(&x)?;
    builder.sqrt(&dead)?;
    let builder_nodes = builder.node_count();
    let graph = builder.build([("y", live)]).await?;
    assert!(builder_nodes > graph.node_count());
    assert_eq!(graph.node_count(), 1);
    Ok(())
}

#[tokio::test]
async fn graph_exposes_reachable_contracts() -> Result<()> {
    let mut builder = GraphBuilder::new();
    let x = builder.input("x", f32_desc(&[2, 3]))?;
    builder.input("unused", f32_desc(&[9]))?;
    let y = builder.sigmoid(&x)?;
    let graph = builder.build([("y", y)]).await?;
    // Inputs no output depends on disappear with the dead subgraph.
    let inputs: Vec<_> = graph.inputs().map(|(name, _)| name.to_owned()).collect();
    assert_eq!(inputs, vec!["x"]);
    assert_eq!(graph.output_descriptor("y"), Some(&f32_desc(&[2, 3])));
    assert_eq!(graph.input_descriptor("unused"), None);
    Ok(())
}

#[tokio::test]
async fn context_rejects_unsupported_device() -> Result<()> {
    let options = ContextOptions {
        device_type: DeviceType::Gpu,
        ..Default::default()
    };
    let err = Context::create(options, Arc::new(CpuBackend::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, GraphError::ContextCreationFailed(_)));
    Ok(())
}

#[tokio::test]
async fn context_builds_graphs_for_cpu() -> Result<()> {
    let context = Context::create(ContextOptions::default(), Arc::new(CpuBackend::new())).await?;
    assert_eq!(context.device_type(), DeviceType::Cpu);
    let mut builder = context.graph_builder();
    let x = builder.input("x", f32_desc(&[4]))?;
    let y = builder.tanh(&x)?;
    let graph = builder.build([("y", y)]).await?;
    assert_eq!(graph.node_count(), 1);
    Ok(())
}
