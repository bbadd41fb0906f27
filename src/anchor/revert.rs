//! Revert-reason extraction from node error messages

/// Human-readable revert reason from a raw RPC error.
///
/// Tries `execution reverted: <reason>`, then `revert: <reason>` /
/// `reverted <reason>`; falls back to the trimmed raw text. Trailing
/// `, data: ...` payloads are dropped.
pub fn extract_revert_reason(raw: &str) -> String {
    let text = raw.trim();
    let lower = text.to_ascii_lowercase();

    for marker in ["execution reverted", "revert"] {
        if let Some(pos) = lower.find(marker) {
            let rest = &text[pos + marker.len()..];
            let rest = if marker == "revert" {
                rest.strip_prefix("ed").unwrap_or(rest)
            } else {
                rest
            };
            let rest = rest.trim_start().trim_start_matches(':').trim_start();
            let reason = strip_payload(rest);
            if !reason.is_empty() {
                return reason.to_string();
            }
        }
    }
    text.to_string()
}

fn strip_payload(text: &str) -> &str {
    let cut = text.find(", data:").unwrap_or(text.len());
    text[..cut].trim().trim_matches('"').trim()
}

/// Whether a revert reason names an invalid proof.
///
/// Only this class is retried with the alternate G2 encoding.
pub fn is_invalid_proof(reason: &str) -> bool {
    let lower = reason.to_ascii_lowercase();
    lower.contains("invalid") && lower.contains("proof")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_reverted_reason() {
        let raw = "server returned an error response: error code 3: execution reverted: Invalid sensor data ZK proof, data: \"0x08c3\"";
        assert_eq!(extract_revert_reason(raw), "Invalid sensor data ZK proof");
    }

    #[test]
    fn test_revert_without_colon() {
        assert_eq!(extract_revert_reason("Transaction reverted Data hash already used"), "Data hash already used");
        assert_eq!(extract_revert_reason("VM Exception: revert: Access denied"), "Access denied");
    }

    #[test]
    fn test_raw_fallback() {
        assert_eq!(extract_revert_reason("  insufficient funds for gas  "), "insufficient funds for gas");
        assert_eq!(extract_revert_reason("execution reverted"), "execution reverted");
    }

    #[test]
    fn test_invalid_proof_classification() {
        assert!(is_invalid_proof("Invalid sensor data ZK proof"));
        assert!(is_invalid_proof("PROOF INVALID"));
        assert!(!is_invalid_proof("Data hash already used"));
        assert!(!is_invalid_proof("invalid nonce"));
    }
}
