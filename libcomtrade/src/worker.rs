use byteorder::{ByteOrder, LittleEndian};
use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::JoinHandle;

use super::cfg::ComtradeConfig;
use super::constants::PROGRESS_INTERVAL;
use super::dat::Dataset;
use super::error::WorkerError;
use super::expression::{ChannelScope, CompiledExpression, SampleSource};

const F64_BYTES: usize = 8;

/// Pack samples into a little-endian byte buffer for handing to a worker
pub fn encode_f64s(values: &[f64]) -> Vec<u8> {
    let mut bytes = vec![0u8; values.len() * F64_BYTES];
    LittleEndian::write_f64_into(values, &mut bytes);
    bytes
}

pub fn decode_f64s(bytes: &[u8]) -> Result<Vec<f64>, WorkerError> {
    if bytes.len() % F64_BYTES != 0 {
        return Err(WorkerError::BadResultBuffer(
            bytes.len(),
            bytes.len() / F64_BYTES * F64_BYTES,
        ));
    }
    let mut values = vec![0.0; bytes.len() / F64_BYTES];
    LittleEndian::read_f64_into(bytes, &mut values);
    Ok(values)
}

/// Everything a worker needs to evaluate one expression. The buffers are owned by the
/// task, so the producer gives them up when it submits.
#[derive(Debug, Clone, Default)]
pub struct EvaluationTask {
    pub task_id: u64,
    pub expression: String,
    pub sample_count: usize,
    pub analog_ids: Vec<String>,
    pub digital_ids: Vec<String>,
    /// One little-endian f64 buffer per analog channel
    pub analog_buffers: Vec<Vec<u8>>,
    /// One byte per sample per digital channel
    pub digital_buffers: Vec<Vec<u8>>,
}

impl EvaluationTask {
    /// Build a task from a recording. The columns are copied into task-owned buffers, so
    /// the dataset stays with the caller and the worker never shares memory with it.
    pub fn from_dataset(expression: &str, config: &ComtradeConfig, dataset: &Dataset) -> Self {
        Self {
            task_id: 0,
            expression: expression.to_string(),
            sample_count: dataset.len(),
            analog_ids: config.analog_ids(),
            digital_ids: config.digital_ids(),
            analog_buffers: dataset.analog.iter().map(|c| encode_f64s(c)).collect(),
            digital_buffers: dataset.digital.clone(),
        }
    }
}

/// Typed read-only view over the byte buffers of a task
struct TaskView<'a> {
    analog: &'a [Vec<u8>],
    digital: &'a [Vec<u8>],
}

impl SampleSource for TaskView<'_> {
    fn analog(&self, channel: usize, sample: usize) -> Option<f64> {
        let start = sample * F64_BYTES;
        self.analog
            .get(channel)
            .and_then(|buf| buf.get(start..start + F64_BYTES))
            .map(LittleEndian::read_f64)
    }

    fn digital(&self, channel: usize, sample: usize) -> Option<f64> {
        self.digital
            .get(channel)
            .and_then(|buf| buf.get(sample))
            .map(|v| *v as f64)
    }
}

/// Messages from a worker to its producer, delivered in order
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerMessage {
    Ready,
    Progress {
        task_id: u64,
        processed: usize,
        total: usize,
        percent: f32,
    },
    Complete {
        task_id: u64,
        result: Vec<u8>,
    },
    Error {
        task_id: u64,
        message: String,
        stack: String,
    },
}

enum WorkerCommand {
    Evaluate(EvaluationTask),
    Terminate,
}

fn percent_of(processed: usize, total: usize) -> f32 {
    if total == 0 {
        100.0
    } else {
        processed as f32 / total as f32 * 100.0
    }
}

/// Evaluate a task, reporting progress. Returns None if the producer went away or asked
/// the worker to stop. Tasks arriving meanwhile are moved to `pending`.
fn run_task(
    task: EvaluationTask,
    tx: &Sender<WorkerMessage>,
    commands: &Receiver<WorkerCommand>,
    pending: &mut VecDeque<EvaluationTask>,
) -> Option<WorkerMessage> {
    let scope = ChannelScope::new(&task.analog_ids, &task.digital_ids);
    let compiled = match CompiledExpression::compile(&task.expression, &scope) {
        Ok(c) => c,
        Err(e) => {
            return Some(WorkerMessage::Error {
                task_id: task.task_id,
                message: e.to_string(),
                stack: format!("{e:?}"),
            })
        }
    };
    let view = TaskView {
        analog: &task.analog_buffers,
        digital: &task.digital_buffers,
    };

    let total = task.sample_count;
    let mut result = vec![0u8; total * F64_BYTES];
    for (sample, slot) in result.chunks_exact_mut(F64_BYTES).enumerate() {
        LittleEndian::write_f64(slot, compiled.evaluate(&view, sample));
        let processed = sample + 1;
        if processed % PROGRESS_INTERVAL == 0 {
            loop {
                match commands.try_recv() {
                    Ok(WorkerCommand::Evaluate(next)) => pending.push_back(next),
                    Ok(WorkerCommand::Terminate) | Err(TryRecvError::Disconnected) => return None,
                    Err(TryRecvError::Empty) => break,
                }
            }
            tx.send(WorkerMessage::Progress {
                task_id: task.task_id,
                processed,
                total,
                percent: percent_of(processed, total),
            })
            .ok()?;
        }
    }
    tx.send(WorkerMessage::Progress {
        task_id: task.task_id,
        processed: total,
        total,
        percent: 100.0,
    })
    .ok()?;
    Some(WorkerMessage::Complete {
        task_id: task.task_id,
        result,
    })
}

fn worker_loop(tx: Sender<WorkerMessage>, commands: Receiver<WorkerCommand>) {
    if tx.send(WorkerMessage::Ready).is_err() {
        return;
    }
    let mut pending = VecDeque::new();
    loop {
        let task = match pending.pop_front() {
            Some(task) => task,
            None => match commands.recv() {
                Ok(WorkerCommand::Evaluate(task)) => task,
                Ok(WorkerCommand::Terminate) | Err(_) => return,
            },
        };
        match run_task(task, &tx, &commands, &mut pending) {
            Some(message) => {
                if tx.send(message).is_err() {
                    return;
                }
            }
            None => return,
        }
    }
}

/// Producer side of a computed-channel evaluation thread.
///
/// Tasks submitted before the worker reports ready are queued and sent once it does.
/// Dropping the worker cancels whatever it is doing; no partial result is returned.
#[derive(Debug)]
pub struct EvaluationWorker {
    commands: Sender<WorkerCommand>,
    messages: Receiver<WorkerMessage>,
    handle: Option<JoinHandle<()>>,
    ready: bool,
    queue: VecDeque<EvaluationTask>,
    next_task_id: u64,
}

impl EvaluationWorker {
    pub fn spawn() -> Self {
        let (command_tx, command_rx) = mpsc::channel::<WorkerCommand>();
        let (message_tx, message_rx) = mpsc::channel::<WorkerMessage>();
        let handle = std::thread::spawn(move || worker_loop(message_tx, command_rx));
        Self {
            commands: command_tx,
            messages: message_rx,
            handle: Some(handle),
            ready: false,
            queue: VecDeque::new(),
            next_task_id: 1,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Hand a task to the worker, returning its id
    pub fn submit(&mut self, mut task: EvaluationTask) -> u64 {
        task.task_id = self.next_task_id;
        self.next_task_id += 1;
        let task_id = task.task_id;
        if self.ready {
            self.send(task);
        } else {
            self.queue.push_back(task);
        }
        task_id
    }

    fn send(&mut self, task: EvaluationTask) {
        if self.commands.send(WorkerCommand::Evaluate(task)).is_err() {
            log::error!("Evaluation worker is gone; task dropped");
        }
    }

    fn handle_message(&mut self, message: &WorkerMessage) {
        if *message == WorkerMessage::Ready {
            self.ready = true;
            while let Some(task) = self.queue.pop_front() {
                self.send(task);
            }
        }
    }

    /// Next message if one is waiting
    pub fn poll(&mut self) -> Option<WorkerMessage> {
        let message = self.messages.try_recv().ok()?;
        self.handle_message(&message);
        Some(message)
    }

    /// Block until `task_id` completes or fails, passing every message to `observer`
    pub fn wait_for<F: FnMut(&WorkerMessage)>(
        &mut self,
        task_id: u64,
        mut observer: F,
    ) -> Result<Vec<f64>, WorkerError> {
        loop {
            let message = self
                .messages
                .recv()
                .map_err(|_| WorkerError::Disconnected)?;
            self.handle_message(&message);
            observer(&message);
            match message {
                WorkerMessage::Complete { task_id: id, result } if id == task_id => {
                    return decode_f64s(&result);
                }
                WorkerMessage::Error {
                    task_id: id,
                    message,
                    stack,
                } if id == task_id => return Err(WorkerError::Failed { message, stack }),
                _ => (),
            }
        }
    }

    /// Stop the worker and wait for its thread to exit
    pub fn terminate(mut self) {
        let _ = self.commands.send(WorkerCommand::Terminate);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("An error occured joining the evaluation worker!");
            }
        }
    }
}

impl Drop for EvaluationWorker {
    fn drop(&mut self) {
        let _ = self.commands.send(WorkerCommand::Terminate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(expression: &str, analog: Vec<Vec<f64>>) -> EvaluationTask {
        EvaluationTask {
            task_id: 0,
            expression: expression.to_string(),
            sample_count: analog.first().map_or(0, |c| c.len()),
            analog_ids: (0..analog.len()).map(|k| format!("CH{k}")).collect(),
            digital_ids: Vec::new(),
            analog_buffers: analog.iter().map(|c| encode_f64s(c)).collect(),
            digital_buffers: Vec::new(),
        }
    }

    fn wait_until_ready(worker: &mut EvaluationWorker) {
        while !worker.is_ready() {
            match worker.messages.recv() {
                Ok(message) => worker.handle_message(&message),
                Err(e) => panic!("{e}"),
            }
        }
    }

    fn long_column() -> Vec<f64> {
        (0..PROGRESS_INTERVAL * 4).map(|i| i as f64).collect()
    }

    #[test]
    fn test_task_copies_columns() {
        let dataset = Dataset {
            time: vec![0.0, 1.0],
            analog: vec![vec![1.5, 2.5]],
            digital: vec![vec![0, 1]],
            ..Default::default()
        };
        let config = ComtradeConfig {
            analog: vec![Default::default()],
            digital: vec![Default::default()],
            ..Default::default()
        };
        let task = EvaluationTask::from_dataset("CH0", &config, &dataset);
        assert_eq!(task.sample_count, 2);
        match decode_f64s(&task.analog_buffers[0]) {
            Ok(values) => assert_eq!(values, dataset.analog[0]),
            Err(e) => panic!("{e}"),
        }
        assert_eq!(task.digital_buffers, dataset.digital);
        assert_eq!(dataset.analog[0], vec![1.5, 2.5]);
    }

    #[test]
    fn test_terminate_mid_task() {
        let mut worker = EvaluationWorker::spawn();
        wait_until_ready(&mut worker);
        worker.submit(task("CH0 * 2", vec![long_column()]));
        // Queued behind the task, so the worker sees it at its first progress check
        if worker.commands.send(WorkerCommand::Terminate).is_err() {
            panic!("worker exited early");
        }
        match worker.handle.take() {
            Some(handle) => assert!(handle.join().is_ok()),
            None => panic!(),
        }
        let leftovers: Vec<WorkerMessage> = worker.messages.try_iter().collect();
        assert!(!leftovers
            .iter()
            .any(|m| matches!(m, WorkerMessage::Complete { .. } | WorkerMessage::Progress { .. })));
    }

    #[test]
    fn test_drop_cancels_task() {
        let mut worker = EvaluationWorker::spawn();
        wait_until_ready(&mut worker);
        worker.submit(task("CH0 + 1", vec![long_column()]));
        let handle = match worker.handle.take() {
            Some(handle) => handle,
            None => panic!(),
        };
        drop(worker);
        assert!(handle.join().is_ok());
    }

    #[test]
    fn test_buffer_round_trip() {
        let values = vec![1.5, -2.25, 99999.0];
        match decode_f64s(&encode_f64s(&values)) {
            Ok(decoded) => assert_eq!(decoded, values),
            Err(e) => panic!("{e}"),
        }
        assert!(decode_f64s(&[0u8; 7]).is_err());
    }

    #[test]
    fn test_progress_is_monotonic() {
        let n = PROGRESS_INTERVAL * 3 + 17;
        let column: Vec<f64> = (0..n).map(|i| i as f64).collect();
        let mut worker = EvaluationWorker::spawn();
        let id = worker.submit(task("CH0 * 2", vec![column]));
        let mut processed = Vec::new();
        let values = match worker.wait_for(id, |m| {
            if let WorkerMessage::Progress { processed: p, .. } = m {
                processed.push(*p)
            }
        }) {
            Ok(v) => v,
            Err(e) => panic!("{e}"),
        };
        assert_eq!(values.len(), n);
        assert_eq!(values[n - 1], 2.0 * (n - 1) as f64);
        assert_eq!(
            processed,
            vec![PROGRESS_INTERVAL, 2 * PROGRESS_INTERVAL, 3 * PROGRESS_INTERVAL, n]
        );
        assert!(worker.is_ready());
        worker.terminate();
    }

    #[test]
    fn test_worker_reports_errors() {
        let mut worker = EvaluationWorker::spawn();
        let id = worker.submit(task("CH0 +", vec![vec![1.0]]));
        match worker.wait_for(id, |_| ()) {
            Err(WorkerError::Failed { message, .. }) => assert!(!message.is_empty()),
            _ => panic!(),
        }
    }

    #[test]
    fn test_queued_tasks_run_in_order() {
        let mut worker = EvaluationWorker::spawn();
        let first = worker.submit(task("CH0 + 1", vec![vec![1.0]]));
        let second = worker.submit(task("CH0 + 2", vec![vec![1.0]]));
        match worker.wait_for(first, |_| ()) {
            Ok(v) => assert_eq!(v, vec![2.0]),
            Err(e) => panic!("{e}"),
        }
        match worker.wait_for(second, |_| ()) {
            Ok(v) => assert_eq!(v, vec![3.0]),
            Err(e) => panic!("{e}"),
        }
    }
}
