//! Layer planning: grouping instructions into image layers.

use kiln_core::error::{KilnError, Result};

use crate::command::Command;
use crate::instruction::{Instruction, LineContext};
use crate::layer::ImageLayer;

/// Normalise layer split marks for `count` instructions.
///
/// No marks means a boundary after every instruction. The list always
/// ends with `count`.
pub fn layer_split_marks(marks: Option<&[usize]>, count: usize) -> Result<Vec<usize>> {
    let mut marks = match marks {
        Some(marks) if !marks.is_empty() => marks.to_vec(),
        _ => (0..count).collect(),
    };

    if marks.last() != Some(&count) {
        marks.push(count);
    }

    tracing::debug!(?marks, "Layer split marks");

    if let Some(&mark) = marks.iter().find(|&&m| m > count) {
        return Err(KilnError::SplitMark { mark, count });
    }

    Ok(marks)
}

/// Group instructions into layers.
///
/// Instructions between two split marks are added to the open layer. At a
/// mark the open layer is closed when it contains a command that changes
/// data and a later instruction changes data too; otherwise it keeps
/// growing, so trailing metadata joins the final layer. Unknown keywords
/// are skipped with a warning.
pub fn plan_layers(
    instructions: &[Instruction],
    contexts: &[LineContext],
    split_marks: Option<&[usize]>,
) -> Result<Vec<ImageLayer>> {
    let count = instructions.len();
    let marks = layer_split_marks(split_marks, count)?;

    let commands: Vec<Option<Command>> = instructions
        .iter()
        .enumerate()
        .map(|(i, instruction)| {
            let context = contexts.get(i).cloned().unwrap_or_default();
            let command = Command::from_instruction(instruction, context);
            if command.is_none() {
                tracing::warn!(
                    keyword = %instruction.keyword,
                    index = i,
                    "Unknown instruction, skipping"
                );
            }
            command
        })
        .collect();

    // Index of the last data-changing command, if any.
    let last_data_change = commands
        .iter()
        .rposition(|c| c.as_ref().is_some_and(|c| c.kind().changes_data()));

    let mut layers: Vec<ImageLayer> = Vec::new();
    let mut layer = ImageLayer::new(0);
    let mut data_changed = false;
    let mut current = 0;

    for mark in marks {
        for command in commands.iter().take(mark).skip(current).flatten() {
            data_changed |= command.kind().changes_data();
            layer.add_command(command.clone());
        }
        current = current.max(mark);

        if mark == count {
            break;
        }

        let more_data_changes = last_data_change.is_some_and(|last| last >= current);
        if data_changed && more_data_changes {
            let next = ImageLayer::new(layers.len() + 1);
            layers.push(std::mem::replace(&mut layer, next));
            data_changed = false;
        }
    }

    if !layer.is_empty() {
        layers.push(layer);
    }

    match layers.last_mut() {
        Some(last) => last.is_last = true,
        None => {
            return Err(KilnError::PlanError(
                "No supported instructions to build".to_string(),
            ))
        }
    }

    Ok(layers)
}
