//! Cardinality and degree statistics consumed by the optimizer's cost model.

use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphStatistics {
    pub node_counts_by_label: BTreeMap<String, u64>,
    pub edge_counts_by_type: BTreeMap<String, u64>,
    pub avg_degree_by_type: BTreeMap<String, f64>,
    pub total_nodes: u64,
    pub total_edges: u64,
}

impl GraphStatistics {
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&self.total_nodes.to_le_bytes());
        bytes.extend_from_slice(&self.total_edges.to_le_bytes());

        bytes.extend_from_slice(&(self.node_counts_by_label.len() as u32).to_le_bytes());
        for (label, count) in &self.node_counts_by_label {
            write_string(&mut bytes, label);
            bytes.extend_from_slice(&count.to_le_bytes());
        }

        bytes.extend_from_slice(&(self.edge_counts_by_type.len() as u32).to_le_bytes());
        for (rel, count) in &self.edge_counts_by_type {
            write_string(&mut bytes, rel);
            bytes.extend_from_slice(&count.to_le_bytes());
        }

        bytes.extend_from_slice(&(self.avg_degree_by_type.len() as u32).to_le_bytes());
        for (rel, avg) in &self.avg_degree_by_type {
            write_string(&mut bytes, rel);
            bytes.extend_from_slice(&avg.to_le_bytes());
        }

        bytes
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let mut pos = 0usize;
        let total_nodes = read_u64(bytes, &mut pos)?;
        let total_edges = read_u64(bytes, &mut pos)?;

        let node_len = read_u32(bytes, &mut pos)? as usize;
        let mut node_counts_by_label = BTreeMap::new();
        for _ in 0..node_len {
            let label = read_string(bytes, &mut pos)?;
            let count = read_u64(bytes, &mut pos)?;
            node_counts_by_label.insert(label, count);
        }

        let edge_len = read_u32(bytes, &mut pos)? as usize;
        let mut edge_counts_by_type = BTreeMap::new();
        for _ in 0..edge_len {
            let rel = read_string(bytes, &mut pos)?;
            let count = read_u64(bytes, &mut pos)?;
            edge_counts_by_type.insert(rel, count);
        }

        let degree_len = read_u32(bytes, &mut pos)? as usize;
        let mut avg_degree_by_type = BTreeMap::new();
        for _ in 0..degree_len {
            let rel = read_string(bytes, &mut pos)?;
            let avg = read_f64(bytes, &mut pos)?;
            avg_degree_by_type.insert(rel, avg);
        }

        Some(GraphStatistics {
            node_counts_by_label,
            edge_counts_by_type,
            avg_degree_by_type,
            total_nodes,
            total_edges,
        })
    }
}

fn write_string(out: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(bytes);
}

fn read_u64(bytes: &[u8], pos: &mut usize) -> Option<u64> {
    let v = u64::from_le_bytes(bytes.get(*pos..*pos + 8)?.try_into().ok()?);
    *pos += 8;
    Some(v)
}

fn read_u32(bytes: &[u8], pos: &mut usize) -> Option<u32> {
    let v = u32::from_le_bytes(bytes.get(*pos..*pos + 4)?.try_into().ok()?);
    *pos += 4;
    Some(v)
}

fn read_f64(bytes: &[u8], pos: &mut usize) -> Option<f64> {
    let v = f64::from_le_bytes(bytes.get(*pos..*pos + 8)?.try_into().ok()?);
    *pos += 8;
    Some(v)
}

fn read_string(bytes: &[u8], pos: &mut usize) -> Option<String> {
    let len = read_u32(bytes, pos)? as usize;
    let slice = bytes.get(*pos..*pos + len)?;
    *pos += len;
    String::from_utf8(slice.to_vec()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trips() {
        let mut stats = GraphStatistics {
            total_nodes: 3,
            total_edges: 2,
            ..Default::default()
        };
        stats.node_counts_by_label.insert("Person".to_string(), 3);
        stats.edge_counts_by_type.insert("KNOWS".to_string(), 2);
        stats.avg_degree_by_type.insert("KNOWS".to_string(), 1.5);

        let encoded = stats.encode();
        let decoded = GraphStatistics::decode(&encoded).unwrap();
        assert_eq!(stats, decoded);
    }
}
