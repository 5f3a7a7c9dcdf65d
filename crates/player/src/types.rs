use serde::{Deserialize, Serialize};

/// Track as returned by the Web API, trimmed to what the player shows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub name: String,
    pub uri: String,
    #[serde(default)]
    pub artists: Vec<Artist>,
    pub album: Album,
    pub duration_ms: u64,
}

impl Track {
    /// Comma-separated artist names.
    pub fn artist_names(&self) -> String {
        self.artists
            .iter()
            .map(|a| a.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artist {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Album {
    pub name: String,
    #[serde(default)]
    pub images: Vec<Image>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub url: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_api_track() {
        let track: Track = serde_json::from_str(
            r#"{
                "id": "4uLU6hMCjMI75M1A2tKUQC",
                "name": "Never Gonna Give You Up",
                "uri": "spotify:track:4uLU6hMCjMI75M1A2tKUQC",
                "artists": [{"name": "Rick Astley", "id": "0gxyHStUsqpMadRV0Di1Qt"}],
                "album": {"name": "Whenever You Need Somebody", "images": [{"url": "https://i.scdn.co/x", "height": 640}]},
                "duration_ms": 213573,
                "explicit": false
            }"#,
        )
        .unwrap();
        assert_eq!(track.artist_names(), "Rick Astley");
        assert_eq!(track.album.images.len(), 1);
        assert_eq!(track.duration_ms, 213_573);
    }
}
