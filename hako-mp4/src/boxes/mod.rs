pub(crate) mod reader;
pub(crate) mod stsd;
pub(crate) mod writer;

use crate::fourcc::FourCC;

pub type NodeIndex = usize;

/// One node of the box tree. Size semantics follow the wire format: 0 means
/// "extends to the end of the enclosing region", 1 means the real size is in
/// `largesize`.
#[derive(Debug)]
pub struct BoxNode {
    pub box_type: FourCC,
    pub size: u32,
    pub largesize: u64,
    pub uuid: Option<[u8; 16]>,
    pub depth: u32,
    pub parent: Option<NodeIndex>,
    pub children: Vec<NodeIndex>,
}

/// Arena-backed box tree: nodes never move, parent/child links are indices,
/// and dropping the arena drops the whole tree at once.
pub struct BoxArena {
    nodes: Vec<BoxNode>,
}

impl BoxArena {
    /// Create an arena holding a synthetic root spanning the whole file.
    pub fn with_root(file_size: u64) -> Self {
        BoxArena {
            nodes: vec![BoxNode {
                box_type: FourCC::ROOT,
                size: 1,
                largesize: file_size,
                uuid: None,
                depth: 0,
                parent: None,
                children: Vec::new(),
            }],
        }
    }

    pub fn root(&self) -> NodeIndex {
        0
    }

    pub fn node(&self, idx: NodeIndex) -> &BoxNode {
        &self.nodes[idx]
    }

    pub fn alloc(
        &mut self,
        parent: NodeIndex,
        box_type: FourCC,
        size: u32,
        largesize: Option<u64>,
    ) -> NodeIndex {
        let depth = self.nodes[parent].depth + 1;
        let idx = self.nodes.len();
        self.nodes.push(BoxNode {
            box_type,
            size,
            largesize: largesize.unwrap_or(0),
            uuid: None,
            depth,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.nodes[parent].children.push(idx);
        idx
    }

    pub fn set_uuid(&mut self, idx: NodeIndex, uuid: [u8; 16]) {
        self.nodes[idx].uuid = Some(uuid);
    }

    pub fn real_size(&self, idx: NodeIndex) -> u64 {
        let node = &self.nodes[idx];
        if node.size == 1 {
            node.largesize
        } else {
            u64::from(node.size)
        }
    }

    /// Dump the tree at debug level, one indented line per box.
    pub fn log_tree(&self) {
        if log::log_enabled!(log::Level::Debug) {
            self.log_node(self.root(), 0);
        }
    }

    fn log_node(&self, idx: NodeIndex, depth: u32) {
        let node = &self.nodes[idx];
        match node.uuid {
            Some(uuid) => log::debug!(
                "{:indent$}- {} size {} uuid {:02x?}",
                "",
                node.box_type,
                self.real_size(idx),
                uuid,
                indent = (depth * 2) as usize
            ),
            None => log::debug!(
                "{:indent$}- {} size {}",
                "",
                node.box_type,
                self.real_size(idx),
                indent = (depth * 2) as usize
            ),
        }
        for &child in &node.children {
            self.log_node(child, depth + 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arena_links_parent_and_children() {
        let mut arena = BoxArena::with_root(1024);
        let moov = arena.alloc(arena.root(), FourCC::MOOV, 512, None);
        let trak = arena.alloc(moov, FourCC::TRAK, 256, None);
        assert_eq!(arena.node(trak).parent, Some(moov));
        assert_eq!(arena.node(moov).children, vec![trak]);
        assert_eq!(arena.node(trak).depth, 2);
        assert_eq!(arena.real_size(arena.root()), 1024);
        assert_eq!(arena.real_size(moov), 512);
    }

    #[test]
    fn largesize_box_reports_wide_size() {
        let mut arena = BoxArena::with_root(1 << 40);
        let mdat = arena.alloc(arena.root(), FourCC::MDAT, 1, Some(5 << 32));
        assert_eq!(arena.real_size(mdat), 5 << 32);
    }
}
