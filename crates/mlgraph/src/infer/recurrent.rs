//! Inference rules for the recurrent operators.
//!
//! Weight tensors pack the per-gate matrices along one axis: three gates for
//! GRU, four for LSTM. The sequence forms prepend a direction axis to every
//! weight and state; the cell forms work on a single step and direction.

use crate::error::{GraphError, Result};
use crate::operand::{DataType, OperandDescriptor};
use crate::ops::{Activation, GruCellOptions, GruOptions, LstmCellOptions, LstmOptions};

fn checked_gates(op: &'static str, gates: u32, hidden_size: u32) -> Result<u32> {
    if hidden_size == 0 {
        return Err(GraphError::option(format!(
            "{op} hiddenSize must be non-zero"
        )));
    }
    hidden_size
        .checked_mul(gates)
        .ok_or_else(|| GraphError::option(format!("{op} hiddenSize {hidden_size} overflows")))
}

fn check_operand(
    op: &'static str,
    role: &'static str,
    operand: &OperandDescriptor,
    dtype: DataType,
    expected: &[u32],
) -> Result<()> {
    if operand.data_type != dtype {
        return Err(GraphError::dtype(format!(
            "{op} {role} dtype {:?} must match input {:?}",
            operand.data_type, dtype
        )));
    }
    if operand.shape.dims() != expected {
        return Err(GraphError::shape(format!(
            "{op} {role} must have shape {expected:?}, got {:?}",
            operand.shape.dims()
        )));
    }
    Ok(())
}

fn check_activations(
    op: &'static str,
    activations: &Option<Vec<Activation>>,
    expected: usize,
) -> Result<()> {
    if let Some(acts) = activations {
        if acts.len() != expected {
            return Err(GraphError::option(format!(
                "{op} expects {expected} activations, got {}",
                acts.len()
            )));
        }
    }
    Ok(())
}

fn rank3(op: &'static str, role: &'static str, operand: &OperandDescriptor) -> Result<()> {
    if operand.shape.rank() != 3 {
        return Err(GraphError::shape(format!(
            "{op} {role} must be rank 3, got rank {}",
            operand.shape.rank()
        )));
    }
    Ok(())
}

pub(super) fn gru(
    steps: u32,
    hidden_size: u32,
    options: &GruOptions,
    inputs: &[OperandDescriptor],
) -> Result<Vec<OperandDescriptor>> {
    const OP: &str = "gru";
    let expected = 3
        + options.has_bias as usize
        + options.has_recurrent_bias as usize
        + options.has_initial_hidden_state as usize;
    if inputs.len() != expected {
        return Err(GraphError::option(format!(
            "{OP} expects {expected} inputs for its flags, got {}",
            inputs.len()
        )));
    }
    let gates = checked_gates(OP, 3, hidden_size)?;
    check_activations(OP, &options.activations, 2)?;

    let input = &inputs[0];
    if !input.data_type.is_float() {
        return Err(GraphError::dtype(format!(
            "{OP} requires a float input, got {:?}",
            input.data_type
        )));
    }
    rank3(OP, "input", input)?;
    let dims = input.shape.dims();
    if steps == 0 || dims[0] != steps {
        return Err(GraphError::shape(format!(
            "{OP} steps {steps} must match the input sequence extent {}",
            dims[0]
        )));
    }
    let (batch, input_size) = (dims[1], dims[2]);
    let directions = options.direction.count();
    let dtype = input.data_type;

    check_operand(OP, "weight", &inputs[1], dtype, &[directions, gates, input_size])?;
    check_operand(
        OP,
        "recurrentWeight",
        &inputs[2],
        dtype,
        &[directions, gates, hidden_size],
    )?;
    let mut next = 3;
    if options.has_bias {
        check_operand(OP, "bias", &inputs[next], dtype, &[directions, gates])?;
        next += 1;
    }
    if options.has_recurrent_bias {
        check_operand(OP, "recurrentBias", &inputs[next], dtype, &[directions, gates])?;
        next += 1;
    }
    if options.has_initial_hidden_state {
        check_operand(
            OP,
            "initialHiddenState",
            &inputs[next],
            dtype,
            &[directions, batch, hidden_size],
        )?;
    }

    let mut outputs = vec![OperandDescriptor::new(
        dtype,
        vec![directions, batch, hidden_size],
    )];
    if options.return_sequence {
        outputs.push(OperandDescriptor::new(
            dtype,
            vec![steps, directions, batch, hidden_size],
        ));
    }
    Ok(outputs)
}

pub(super) fn gru_cell(
    hidden_size: u32,
    options: &GruCellOptions,
    inputs: &[OperandDescriptor],
) -> Result<Vec<OperandDescriptor>> {
    const OP: &str = "gruCell";
    let expected = 4 + options.has_bias as usize + options.has_recurrent_bias as usize;
    if inputs.len() != expected {
        return Err(GraphError::option(format!(
            "{OP} expects {expected} inputs for its flags, got {}",
            inputs.len()
        )));
    }
    let gates = checked_gates(OP, 3, hidden_size)?;
    check_activations(OP, &options.activations, 2)?;

    let input = &inputs[0];
    if !input.data_type.is_float() {
        return Err(GraphError::dtype(format!(
            "{OP} requires a float input, got {:?}",
            input.data_type
        )));
    }
    if input.shape.rank() != 2 {
        return Err(GraphError::shape(format!(
            "{OP} input must be rank 2, got rank {}",
            input.shape.rank()
        )));
    }
    let (batch, input_size) = (input.shape.dims()[0], input.shape.dims()[1]);
    let dtype = input.data_type;

    check_operand(OP, "weight", &inputs[1], dtype, &[gates, input_size])?;
    check_operand(OP, "recurrentWeight", &inputs[2], dtype, &[gates, hidden_size])?;
    check_operand(OP, "hiddenState", &inputs[3], dtype, &[batch, hidden_size])?;
    let mut next = 4;
    if options.has_bias {
        check_operand(OP, "bias", &inputs[next], dtype, &[gates])?;
        next += 1;
    }
    if options.has_recurrent_bias {
        check_operand(OP, "recurrentBias", &inputs[next], dtype, &[gates])?;
    }

    Ok(vec![OperandDescriptor::new(dtype, vec![batch, hidden_size])])
}

pub(super) fn lstm(
    steps: u32,
    hidden_size: u32,
    options: &LstmOptions,
    inputs: &[OperandDescriptor],
) -> Result<Vec<OperandDescriptor>> {
    const OP: &str = "lstm";
    let expected = 3
        + options.has_bias as usize
        + options.has_recurrent_bias as usize
        + options.has_peephole_weight as usize
        + options.has_initial_hidden_state as usize
        + options.has_initial_cell_state as usize;
    if inputs.len() != expected {
        return Err(GraphError::option(format!(
            "{OP} expects {expected} inputs for its flags, got {}",
            inputs.len()
        )));
    }
    let gates = checked_gates(OP, 4, hidden_size)?;
    check_activations(OP, &options.activations, 3)?;

    let input = &inputs[0];
    if !input.data_type.is_float() {
        return Err(GraphError::dtype(format!(
            "{OP} requires a float input, got {:?}",
            input.data_type
        )));
    }
    rank3(OP, "input", input)?;
    let dims = input.shape.dims();
    if steps == 0 || dims[0] != steps {
        return Err(GraphError::shape(format!(
            "{OP} steps {steps} must match the input sequence extent {}",
            dims[0]
        )));
    }
    let (batch, input_size) = (dims[1], dims[2]);
    let directions = options.direction.count();
    let dtype = input.data_type;

    check_operand(OP, "weight", &inputs[1], dtype, &[directions, gates, input_size])?;
    check_operand(
        OP,
        "recurrentWeight",
        &inputs[2],
        dtype,
        &[directions, gates, hidden_size],
    )?;
    let mut next = 3;
    if options.has_bias {
        check_operand(OP, "bias", &inputs[next], dtype, &[directions, gates])?;
        next += 1;
    }
    if options.has_recurrent_bias {
        check_operand(OP, "recurrentBias", &inputs[next], dtype, &[directions, gates])?;
        next += 1;
    }
    if options.has_peephole_weight {
        // Peepholes feed only the input, output, and forget gates.
        let peephole = hidden_size
            .checked_mul(3)
            .ok_or_else(|| GraphError::option(format!("{OP} hiddenSize overflows")))?;
        check_operand(
            OP,
            "peepholeWeight",
            &inputs[next],
            dtype,
            &[directions, peephole],
        )?;
        next += 1;
    }
    if options.has_initial_hidden_state {
        check_operand(
            OP,
            "initialHiddenState",
            &inputs[next],
            dtype,
            &[directions, batch, hidden_size],
        )?;
        next += 1;
    }
    if options.has_initial_cell_state {
        check_operand(
            OP,
            "initialCellState",
            &inputs[next],
            dtype,
            &[directions, batch, hidden_size],
        )?;
    }

    let state = vec![directions, batch, hidden_size];
    let mut outputs = vec![
        OperandDescriptor::new(dtype, state.clone()),
        OperandDescriptor::new(dtype, state),
    ];
    if options.return_sequence {
        outputs.push(OperandDescriptor::new(
            dtype,
            vec![steps, directions, batch, hidden_size],
        ));
    }
    Ok(outputs)
}

pub(super) fn lstm_cell(
    hidden_size: u32,
    options: &LstmCellOptions,
    inputs: &[OperandDescriptor],
) -> Result<Vec<OperandDescriptor>> {
    const OP: &str = "lstmCell";
    let expected = 5
        + options.has_bias as usize
        + options.has_recurrent_bias as usize
        + options.has_peephole_weight as usize;
    if inputs.len() != expected {
        return Err(GraphError::option(format!(
            "{OP} expects {expected} inputs for its flags, got {}",
            inputs.len()
        )));
    }
    let gates = checked_gates(OP, 4, hidden_size)?;
    check_activations(OP, &options.activations, 3)?;

    let input = &inputs[0];
    if !input.data_type.is_float() {
        return Err(GraphError::dtype(format!(
            "{OP} requires a float input, got {:?}",
            input.data_type
        )));
    }
    if input.shape.rank() != 2 {
        return Err(GraphError::shape(format!(
            "{OP} input must be rank 2, got rank {}",
            input.shape.rank()
        )));
    }
    let (batch, input_size) = (input.shape.dims()[0], input.shape.dims()[1]);
    let dtype = input.data_type;

    check_operand(OP, "weight", &inputs[1], dtype, &[gates, input_size])?;
    check_operand(OP, "recurrentWeight", &inputs[2], dtype, &[gates, hidden_size])?;
    check_operand(OP, "hiddenState", &inputs[3], dtype, &[batch, hidden_size])?;
    check_operand(OP, "cellState", &inputs[4], dtype, &[batch, hidden_size])?;
    let mut next = 5;
    if options.has_bias {
        check_operand(OP, "bias", &inputs[next], dtype, &[gates])?;
        next += 1;
    }
    if options.has_recurrent_bias {
        check_operand(OP, "recurrentBias", &inputs[next], dtype, &[gates])?;
        next += 1;
    }
    if options.has_peephole_weight {
        let peephole = hidden_size
            .checked_mul(3)
            .ok_or_else(|| GraphError::option(format!("{OP} hiddenSize overflows")))?;
        check_operand(OP, "peepholeWeight", &inputs[next], dtype, &[peephole])?;
    }

    let state = OperandDescriptor::new(dtype, vec![batch, hidden_size]);
    Ok(vec![state.clone(), state])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::RecurrentDirection;

    fn f32_desc(dims: &[u32]) -> OperandDescriptor {
        OperandDescriptor::new(DataType::F32, dims.to_vec())
    }

    #[test]
    fn gru_hidden_state_output() {
        let out = gru(
            4,
            8,
            &GruOptions::default(),
            &[
                f32_desc(&[4, 2, 5]),
                f32_desc(&[1, 24, 5]),
                f32_desc(&[1, 24, 8]),
            ],
        )
        .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].shape.dims(), &[1, 2, 8]);
    }

    #[test]
    fn gru_return_sequence_adds_per_step_output() {
        let options = GruOptions {
            return_sequence: true,
            direction: RecurrentDirection::Both,
            ..Default::default()
        };
        let out = gru(
            4,
            8,
            &options,
            &[
                f32_desc(&[4, 2, 5]),
                f32_desc(&[2, 24, 5]),
                f32_desc(&[2, 24, 8]),
            ],
        )
        .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].shape.dims(), &[2, 2, 8]);
        assert_eq!(out[1].shape.dims(), &[4, 2, 2, 8]);
    }

    #[test]
    fn gru_rejects_wrong_gate_packing() {
        let err = gru(
            4,
            8,
            &GruOptions::default(),
            &[
                f32_desc(&[4, 2, 5]),
                f32_desc(&[1, 16, 5]),
                f32_desc(&[1, 24, 8]),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, GraphError::ShapeMismatch(_)));
    }

    #[test]
    fn gru_cell_single_step() {
        let out = gru_cell(
            8,
            &GruCellOptions::default(),
            &[
                f32_desc(&[2, 5]),
                f32_desc(&[24, 5]),
                f32_desc(&[24, 8]),
                f32_desc(&[2, 8]),
            ],
        )
        .unwrap();
        assert_eq!(out[0].shape.dims(), &[2, 8]);
    }

    #[test]
    fn lstm_produces_hidden_and_cell_state() {
        let out = lstm(
            3,
            6,
            &LstmOptions::default(),
            &[
                f32_desc(&[3, 2, 4]),
                f32_desc(&[1, 24, 4]),
                f32_desc(&[1, 24, 6]),
            ],
        )
        .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].shape.dims(), &[1, 2, 6]);
        assert_eq!(out[1].shape.dims(), &[1, 2, 6]);
    }

    #[test]
    fn lstm_cell_peephole_covers_three_gates() {
        let options = LstmCellOptions {
            has_peephole_weight: true,
            ..Default::default()
        };
        let out = lstm_cell(
            6,
            &options,
            &[
                f32_desc(&[2, 4]),
                f32_desc(&[24, 4]),
                f32_desc(&[24, 6]),
                f32_desc(&[2, 6]),
                f32_desc(&[2, 6]),
                f32_desc(&[18]),
            ],
        )
        .unwrap();
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn lstm_steps_must_match_sequence_extent() {
        let err = lstm(
            5,
            6,
            &LstmOptions::default(),
            &[
                f32_desc(&[3, 2, 4]),
                f32_desc(&[1, 24, 4]),
                f32_desc(&[1, 24, 6]),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, GraphError::ShapeMismatch(_)));
    }
}
