use std::path::PathBuf;

/// The concatenated output of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedFile {
    pub path: PathBuf,
    pub size: u64,
    /// Seconds, as advertised by the playlist.
    pub duration: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartFile {
    pub path: PathBuf,
    pub size: u64,
    /// 1-based.
    pub index: usize,
}

/// What a run hands to its caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Artifact {
    Single(MergedFile),
    Parts {
        parts: Vec<PartFile>,
        /// Number of parts the split planned. More than `parts.len()` when
        /// some extractions failed.
        expected: usize,
    },
}

/// A file ready for transport, with the caption it should carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deliverable {
    pub path: PathBuf,
    pub size: u64,
    pub caption: String,
}

impl Artifact {
    pub fn total_size(&self) -> u64 {
        match self {
            Artifact::Single(merged) => merged.size,
            Artifact::Parts { parts, .. } => parts.iter().map(|part| part.size).sum(),
        }
    }

    /// True when a split produced fewer parts than planned.
    pub fn is_degraded(&self) -> bool {
        match self {
            Artifact::Single(_) => false,
            Artifact::Parts { parts, expected } => parts.len() < *expected,
        }
    }

    pub fn deliverables(&self, display_name: &str) -> Vec<Deliverable> {
        match self {
            Artifact::Single(merged) => vec![Deliverable {
                path: merged.path.clone(),
                size: merged.size,
                caption: format!("Downloaded and merged: {display_name}"),
            }],
            Artifact::Parts { parts, .. } => parts
                .iter()
                .enumerate()
                .map(|(position, part)| Deliverable {
                    path: part.path.clone(),
                    size: part.size,
                    caption: format!("Part {}/{} - {}", position + 1, parts.len(), display_name),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(index: usize, size: u64) -> PartFile {
        PartFile {
            path: PathBuf::from(format!("/w/v_part{index:02}.mp4")),
            size,
            index,
        }
    }

    #[test]
    fn single_file_caption() {
        let artifact = Artifact::Single(MergedFile {
            path: PathBuf::from("/w/v.mp4"),
            size: 10,
            duration: 4.0,
        });
        let deliverables = artifact.deliverables("v.mp4");
        assert_eq!(deliverables.len(), 1);
        assert_eq!(deliverables[0].caption, "Downloaded and merged: v.mp4");
        assert!(!artifact.is_degraded());
    }

    #[test]
    fn part_captions_and_degradation() {
        let artifact = Artifact::Parts {
            parts: vec![part(1, 5), part(3, 7)],
            expected: 3,
        };
        let captions: Vec<_> = artifact
            .deliverables("v.mp4")
            .into_iter()
            .map(|d| d.caption)
            .collect();
        assert_eq!(captions, ["Part 1/2 - v.mp4", "Part 2/2 - v.mp4"]);
        assert!(artifact.is_degraded());
        assert_eq!(artifact.total_size(), 12);
    }
}
