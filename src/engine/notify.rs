//! The serialized notification channel.
//!
//! Workers never call the delegate themselves. They push notifications into
//! an unbounded channel, and a single thread drains it in arrival order. The
//! delegate therefore never sees two callbacks at once, and a slow delegate
//! never holds up a worker.

use std::sync::mpsc::{Receiver, Sender};

use crate::delegate::JobDelegate;
use crate::job::Job;
use crate::process::ProcessResult;

pub(crate) enum Notification {
    Started {
        index: usize,
        argv: Vec<String>,
        pid: u32,
    },
    Finished {
        index: usize,
        result: ProcessResult,
    },
}

/// Sending half handed to every job body.
#[derive(Clone)]
pub(crate) struct Notifier(Sender<Notification>);

impl Notifier {
    pub(crate) fn new(sender: Sender<Notification>) -> Self {
        Self(sender)
    }

    pub(crate) fn started(&self, index: usize, argv: Vec<String>, pid: u32) {
        self.send(Notification::Started { index, argv, pid });
    }

    pub(crate) fn finished(&self, index: usize, result: ProcessResult) {
        self.send(Notification::Finished { index, result });
    }

    fn send(&self, notification: Notification) {
        if self.0.send(notification).is_err() {
            tracing::warn!("notification thread is gone, dropping notification");
        }
    }
}

/// Delivers notifications until every [`Notifier`] is dropped.
pub(crate) fn deliver(jobs: &[Job], delegate: &dyn JobDelegate, receiver: Receiver<Notification>) {
    for notification in receiver {
        match notification {
            Notification::Started { index, argv, pid } => {
                delegate.job_started(&jobs[index], &argv, pid);
            }
            Notification::Finished { index, result } => {
                delegate.job_finished(&jobs[index], &result, result.pid);
            }
        }
    }
}
