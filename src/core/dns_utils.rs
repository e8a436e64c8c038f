/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! Shared DNS-level helpers used across plugins and executors.

use hickory_proto::op::{Message, MessageType, ResponseCode};

/// Build a minimal DNS response from request, preserving id/opcode/query.
pub fn build_response_from_request(request: &Message, rcode: ResponseCode) -> Message {
    let mut response = Message::new();
    response.set_id(request.id());
    response.set_op_code(request.op_code());
    response.set_message_type(MessageType::Response);
    response.set_response_code(rcode);
    response.set_recursion_desired(request.recursion_desired());
    *response.queries_mut() = request.queries().to_vec();
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::op::Query;
    use hickory_proto::rr::{Name, RecordType};
    use std::str::FromStr;

    fn sample_request() -> Message {
        let mut request = Message::new();
        request.set_id(0x4d2);
        request.set_recursion_desired(true);
        request.add_query(Query::query(
            Name::from_str("example.com.").unwrap(),
            RecordType::A,
        ));
        request
    }

    #[test]
    fn response_preserves_id_and_question() {
        let request = sample_request();
        let response = build_response_from_request(&request, ResponseCode::NoError);

        assert_eq!(response.id(), request.id());
        assert_eq!(response.message_type(), MessageType::Response);
        assert_eq!(response.queries(), request.queries());
        assert!(response.recursion_desired());
        assert!(response.answers().is_empty());
    }

    #[test]
    fn nxdomain_response_carries_name_error() {
        let response = build_response_from_request(&sample_request(), ResponseCode::NXDomain);
        assert_eq!(response.response_code(), ResponseCode::NXDomain);
    }
}
