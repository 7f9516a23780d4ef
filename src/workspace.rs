use crate::buffer::{Buffer, BufferView, BufferViewMut, ReduceOp};
use crate::error::{CollectiveError, Result};
use crate::plan::PartitionFn;

/// The data of one collective call: what we contribute, where the result
/// lands, how contributions combine, and the name that correlates messages
/// across peers.
#[derive(Debug)]
pub struct Workspace<'a> {
    pub send_buf: BufferView<'a>,
    pub recv_buf: BufferViewMut<'a>,
    pub op: ReduceOp,
    pub name: String,
}

impl<'a> Workspace<'a> {
    pub fn new(
        send_buf: &'a Buffer,
        recv_buf: &'a mut Buffer,
        op: ReduceOp,
        name: impl Into<String>,
    ) -> Result<Self> {
        Self::from_views(send_buf.view(), recv_buf.view_mut(), op, name)
    }

    pub fn from_views(
        send_buf: BufferView<'a>,
        recv_buf: BufferViewMut<'a>,
        op: ReduceOp,
        name: impl Into<String>,
    ) -> Result<Self> {
        if send_buf.dtype() != recv_buf.dtype() || send_buf.count() != recv_buf.count() {
            return Err(CollectiveError::BufferMismatch(format!(
                "send buffer is {} x {:?} but receive buffer is {} x {:?}",
                send_buf.count(),
                send_buf.dtype(),
                recv_buf.count(),
                recv_buf.dtype()
            )));
        }
        Ok(Self {
            send_buf,
            recv_buf,
            op,
            name: name.into(),
        })
    }

    pub fn count(&self) -> usize {
        self.send_buf.count()
    }

    /// Byte length every message of this workspace must have.
    pub fn byte_len(&self) -> usize {
        self.send_buf.byte_len()
    }

    /// Splits into `parts` sub-workspaces over disjoint element ranges, each
    /// with its own message name.
    pub fn split(self, partition: PartitionFn, parts: usize) -> Result<Vec<Workspace<'a>>> {
        let count = self.count();
        let ranges = partition(count, parts);
        if ranges.len() != parts {
            return Err(CollectiveError::Partition(format!(
                "expected {} ranges, got {}",
                parts,
                ranges.len()
            )));
        }

        let mut send = self.send_buf;
        let mut recv = self.recv_buf;
        let mut begin = 0;
        let mut out = Vec::with_capacity(parts);
        for (i, r) in ranges.into_iter().enumerate() {
            if r.start != begin || r.end < r.start || r.end > count {
                return Err(CollectiveError::Partition(format!(
                    "range {:?} does not continue at {} within {}",
                    r, begin, count
                )));
            }
            let len = r.end - r.start;
            let (send_head, send_tail) = send.split_at(len);
            let (recv_head, recv_tail) = recv.split_at(len);
            out.push(Workspace {
                send_buf: send_head,
                recv_buf: recv_head,
                op: self.op,
                name: format!("part::{}[{}/{}]", self.name, i, parts),
            });
            send = send_tail;
            recv = recv_tail;
            begin = r.end;
        }
        if begin != count {
            return Err(CollectiveError::Partition(format!(
                "ranges cover {} of {} elements",
                begin, count
            )));
        }
        Ok(out)
    }
}
