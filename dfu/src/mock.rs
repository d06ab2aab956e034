//! Scripted in-memory transport for unit tests

use std::cell::RefCell;
use std::collections::VecDeque;

use nusb::transfer::TransferError;

use crate::error::DfuError;
use crate::status::DfuState;
use crate::transport::DfuTransport;

const DNLOAD: u8 = 1;
const GETSTATUS: u8 = 3;

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Request {
    In { request: u8, value: u16, length: u16 },
    Out { request: u8, value: u16, data: Vec<u8> },
}

impl Request {
    pub(crate) fn code(&self) -> u8 {
        match self {
            Request::In { request, .. } | Request::Out { request, .. } => {
                *request
            }
        }
    }
}

/// GET_STATUS response with a zero poll timeout
pub(crate) fn status_bytes(status: u8, state: DfuState) -> Vec<u8> {
    vec![status, 0, 0, 0, state.code(), 0]
}

/// Answers GET_STATUS from a queue, falling back to `idle_status` once the
/// queue is drained, and records every request.
pub(crate) struct MockTransport {
    requests: RefCell<Vec<Request>>,
    statuses: RefCell<VecDeque<Result<Vec<u8>, TransferError>>>,
    idle_status: RefCell<Result<Vec<u8>, TransferError>>,
    // (request, value) pairs failing their OUT transfer
    out_failures: RefCell<Vec<(u8, Option<u16>, TransferError)>>,
    final_block_failure: RefCell<Option<TransferError>>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        MockTransport {
            requests: RefCell::new(Vec::new()),
            statuses: RefCell::new(VecDeque::new()),
            idle_status: RefCell::new(Ok(status_bytes(
                0,
                DfuState::DownloadIdle,
            ))),
            out_failures: RefCell::new(Vec::new()),
            final_block_failure: RefCell::new(None),
        }
    }

    pub(crate) fn push_status(&self, data: Vec<u8>) {
        self.statuses.borrow_mut().push_back(Ok(data));
    }

    pub(crate) fn push_status_error(&self, err: TransferError) {
        self.statuses.borrow_mut().push_back(Err(err));
    }

    pub(crate) fn set_idle_status(&self, data: Vec<u8>) {
        *self.idle_status.borrow_mut() = Ok(data);
    }

    pub(crate) fn set_idle_status_error(&self, err: TransferError) {
        *self.idle_status.borrow_mut() = Err(err);
    }

    /// Fail the DNLOAD carrying block number `block_nr`
    pub(crate) fn fail_download(&self, block_nr: u16, err: TransferError) {
        self.out_failures
            .borrow_mut()
            .push((DNLOAD, Some(block_nr), err));
    }

    /// Fail every OUT transfer with request code `request`
    pub(crate) fn fail_request(&self, request: u8, err: TransferError) {
        self.out_failures.borrow_mut().push((request, None, err));
    }

    /// Fail the zero-length DNLOAD ending the download
    pub(crate) fn fail_final_block(&self, err: TransferError) {
        *self.final_block_failure.borrow_mut() = Some(err);
    }

    pub(crate) fn requests(&self) -> Vec<Request> {
        self.requests.borrow().clone()
    }

    /// (block number, payload) of every DNLOAD, in order
    pub(crate) fn downloads(&self) -> Vec<(u16, Vec<u8>)> {
        self.requests
            .borrow()
            .iter()
            .filter_map(|req| match req {
                Request::Out {
                    request: DNLOAD,
                    value,
                    data,
                } => Some((*value, data.clone())),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn status_reads(&self) -> usize {
        self.requests
            .borrow()
            .iter()
            .filter(|req| req.code() == GETSTATUS)
            .count()
    }
}

impl DfuTransport for MockTransport {
    fn control_in(
        &self,
        request: u8,
        value: u16,
        length: u16,
    ) -> Result<Vec<u8>, DfuError> {
        self.requests.borrow_mut().push(Request::In {
            request,
            value,
            length,
        });
        if request != GETSTATUS {
            return Err(DfuError::Transfer(TransferError::Stall));
        }
        let next = self.statuses.borrow_mut().pop_front();
        let response = next.unwrap_or_else(|| self.idle_status.borrow().clone());
        Ok(response?)
    }

    fn control_out(
        &self,
        request: u8,
        value: u16,
        data: &[u8],
    ) -> Result<(), DfuError> {
        self.requests.borrow_mut().push(Request::Out {
            request,
            value,
            data: data.to_vec(),
        });
        let final_block = request == DNLOAD && data.is_empty();
        let failure = self
            .out_failures
            .borrow()
            .iter()
            .find_map(|(req, val, err)| {
                (*req == request && val.is_none_or(|v| v == value))
                    .then(|| err.clone())
            })
            .or_else(|| {
                final_block
                    .then(|| self.final_block_failure.borrow().clone())
                    .flatten()
            });
        match failure {
            Some(err) => Err(DfuError::Transfer(err)),
            None => Ok(()),
        }
    }
}
