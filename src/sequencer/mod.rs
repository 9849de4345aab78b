use crate::correlation::CorrelationAllocator;
use crate::error::SessionError;
use crate::files::RemoteFileCache;
use crate::model::{Request, Response};
use crate::transport::Transport;
use std::collections::HashMap;

/// Single gateway for outbound requests.
///
/// Stamps correlation ids, records file-mutating requests in the remote file
/// cache, and holds the continuation table for sequential chains: an entry
/// `id -> next` means `next` goes out as soon as the response for `id` is seen.
#[derive(Default)]
pub struct RequestSequencer {
    ids: CorrelationAllocator,
    continuations: HashMap<u16, Request>,
    transport: Option<Box<dyn Transport>>,
}

impl RequestSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, transport: Box<dyn Transport>) {
        self.transport = Some(transport);
    }

    /// Abandons every outstanding chain and drops the transport handle.
    /// The correlation counter keeps running so stale responses stay unmatched.
    pub fn reset(&mut self) {
        let abandoned = self.continuations.len();
        self.continuations.clear();
        self.transport = None;
        if abandoned > 0 {
            tracing::debug!(abandoned, "dropped pending sequential requests");
        }
    }

    pub fn pending_len(&self) -> usize {
        self.continuations.len()
    }

    pub fn query_file_support(&mut self) -> Result<bool, SessionError> {
        match self.transport.as_mut() {
            Some(transport) => transport.query_file_support(),
            None => Err(SessionError::TransportUnavailable),
        }
    }

    /// Sends one request, stamping a correlation id if it has none.
    pub fn send(
        &mut self,
        mut request: Request,
        files: &mut RemoteFileCache,
    ) -> Result<u16, SessionError> {
        let correlation_id = match request.correlation_id {
            Some(id) => id,
            None => {
                let id = self.ids.next();
                request.correlation_id = Some(id);
                id
            }
        };

        let Some(transport) = self.transport.as_mut() else {
            tracing::warn!(
                correlation_id,
                function = request.function_name(),
                "dropping request: no live proxy"
            );
            return Err(SessionError::TransportUnavailable);
        };

        if let Some(filename) = request.mutated_file() {
            files.mark_pending(correlation_id, filename);
        }

        tracing::debug!(
            correlation_id,
            function = request.function_name(),
            "outbound request"
        );
        if let Err(err) = transport.send(&request) {
            // The chain stops here; its continuation (if any) stays orphaned until reset.
            files.resolve_pending(correlation_id);
            tracing::warn!(
                correlation_id,
                function = request.function_name(),
                error = %err,
                "request send failed"
            );
            return Err(err);
        }
        Ok(correlation_id)
    }

    /// Sends a batch. With `sequential`, request k+1 waits for the response to request k.
    pub fn send_chain(
        &mut self,
        mut requests: Vec<Request>,
        sequential: bool,
        files: &mut RemoteFileCache,
    ) {
        if requests.is_empty() {
            return;
        }

        if !sequential {
            for request in requests {
                let _ = self.send(request, files);
            }
            return;
        }

        let last = requests.len() - 1;
        for request in requests.iter_mut().take(last) {
            request.correlation_id = Some(self.ids.next());
        }
        let mut chain = requests.into_iter();
        let Some(first) = chain.next() else {
            return;
        };
        let mut prev_id = first.correlation_id;
        for next in chain {
            if let Some(id) = prev_id {
                prev_id = next.correlation_id;
                self.continuations.insert(id, next);
            }
        }
        let _ = self.send(first, files);
    }

    /// Releases the continuation waiting on this response, if any.
    /// Unknown correlation ids are ignored.
    pub fn on_response(&mut self, response: &Response, files: &mut RemoteFileCache) {
        match self.continuations.remove(&response.correlation_id) {
            Some(next) => {
                tracing::debug!(
                    after = response.correlation_id,
                    next = ?next.correlation_id,
                    function = next.function_name(),
                    "releasing sequential request"
                );
                let _ = self.send(next, files);
            }
            None => {
                tracing::trace!(
                    correlation_id = response.correlation_id,
                    "response without continuation"
                );
            }
        }
    }
}
