use crate::ProofResult;
use log::info;
use std::{
    ops::Deref,
    sync::mpsc::{self, Receiver, Sender},
};

pub trait TracerIf: Send {
    /// Trace the result of one stage of the proof flow.
    fn trace_stage(&mut self, _stage: &str, _res: ProofResult) {}
}

/// Sender part of channel tracer
pub struct ChannelTracerSx(Sender<(String, ProofResult)>);

impl TracerIf for ChannelTracerSx {
    fn trace_stage(&mut self, stage: &str, res: ProofResult) {
        let _ = self.0.send((stage.to_string(), res));
    }
}

/// Receiver part of channel tracer
pub struct ChannelTracerRx(Receiver<(String, ProofResult)>);

impl Deref for ChannelTracerRx {
    type Target = Receiver<(String, ProofResult)>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Create a channel tracer pair (sender, receiver)
pub fn channel_tracer() -> (ChannelTracerSx, ChannelTracerRx) {
    let (tx, rx) = mpsc::channel();
    (ChannelTracerSx(tx), ChannelTracerRx(rx))
}

/// Ordered execution trace of a proof, fanned out to the attached tracers.
#[derive(Default)]
pub struct Tracer {
    tracers: Vec<Box<dyn TracerIf>>,
    trace: Vec<(String, ProofResult)>,
}

impl Tracer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_tracer(&mut self, tracer: Box<dyn TracerIf>) {
        self.tracers.push(tracer);
    }

    pub fn trace_stage(&mut self, stage: &str, res: ProofResult) {
        self.trace.push((stage.to_string(), res));
        for t in self.tracers.iter_mut() {
            t.trace_stage(stage, res);
        }
    }

    pub fn entries(&self) -> &[(String, ProofResult)] {
        &self.trace
    }
}

pub struct LogTracer {
    name: String,
}

impl LogTracer {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl TracerIf for LogTracer {
    fn trace_stage(&mut self, stage: &str, res: ProofResult) {
        match res {
            ProofResult::SatTrue => info!("{}: {stage} found a real counterexample", self.name),
            ProofResult::Unsat => info!("{}: {stage} proved the property", self.name),
            res => info!("{}: {stage} ended {res}", self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FlowError;

    #[test]
    fn trace_is_ordered_and_forwarded() {
        let (tx, rx) = channel_tracer();
        let mut t = Tracer::new();
        t.add_tracer(Box::new(tx));
        t.add_tracer(Box::new(LogTracer::new("m")));
        t.trace_stage("simplify", ProofResult::UndecidedReduction);
        t.trace_stage("abs", ProofResult::Error(FlowError::AbstractionFailedToRefine));
        t.trace_stage("final", ProofResult::Unsat);
        let stages: Vec<&str> = t.entries().iter().map(|(s, _)| s.as_str()).collect();
        assert_eq!(stages, vec!["simplify", "abs", "final"]);
        assert_eq!(rx.try_iter().count(), 3);
    }
}
