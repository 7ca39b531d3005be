//! Integration tests driving the server over raw SMTP sessions

use mailcatch::{ForwardConfig, SmtpLimits, SmtpServer};
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

struct Client {
    stream: TcpStream,
    reader: BufReader<TcpStream>,
}

impl Client {
    fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).unwrap();
        let reader = BufReader::new(stream.try_clone().unwrap());
        let mut client = Self { stream, reader };
        let greeting = client.read_reply();
        assert!(greeting.starts_with("220"), "{greeting}");
        client
    }

    fn read_reply(&mut self) -> String {
        let mut reply = String::new();
        loop {
            let mut line = String::new();
            self.reader.read_line(&mut line).unwrap();
            reply.push_str(&line);
            if line.as_bytes().get(3) != Some(&b'-') {
                return reply.trim_end().to_string();
            }
        }
    }

    fn send_command(&mut self, command: &str) -> String {
        write!(self.stream, "{command}\r\n").unwrap();
        self.stream.flush().unwrap();
        self.read_reply()
    }

    /// Run a whole transaction and return the reply to the final `.`
    fn send_mail(&mut self, sender: &str, recipients: &[&str], message: &str) -> String {
        assert!(self
            .send_command(&format!("MAIL FROM:<{sender}>"))
            .starts_with("250"));
        for recipient in recipients {
            assert!(self
                .send_command(&format!("RCPT TO:<{recipient}>"))
                .starts_with("250"));
        }
        assert!(self.send_command("DATA").starts_with("354"));

        for line in message.split('\n') {
            let stuffed = if line.starts_with('.') { "." } else { "" };
            write!(self.stream, "{stuffed}{line}\r\n").unwrap();
        }
        self.send_command(".")
    }
}

fn start_test_server() -> (SmtpServer, SocketAddr) {
    let server = SmtpServer::new("test.local");
    let addr = server.spawn("127.0.0.1:0").unwrap();
    (server, addr)
}

fn message(from: &str, to: &str, subject: &str, body: &str) -> String {
    format!("From: {from}\nTo: {to}\nSubject: {subject}\n\n{body}")
}

/// Send one message on its own connection
fn send_one(addr: SocketAddr, from: &str, to: &str, subject: &str, body: &str) {
    let mut client = Client::connect(addr);
    client.send_command("HELO client.local");
    let reply = client.send_mail(from, &[to], &message(from, to, subject, body));
    assert!(reply.starts_with("250"), "{reply}");
    client.send_command("QUIT");
}

#[test]
fn test_no_emails_before_any_message() {
    let (server, _addr) = start_test_server();

    assert!(server.get_emails().is_empty());
    assert!(server.get_emails_and_reset().is_empty());
}

#[test]
fn test_single_round_trip() {
    let (server, addr) = start_test_server();

    send_one(addr, "from@a.com", "to@b.com", "subject", "body");

    let emails = server.get_emails();
    assert_eq!(emails.len(), 1);
    assert_eq!(emails[0].from, vec!["from@a.com"]);
    assert_eq!(emails[0].to, vec!["to@b.com"]);
    assert_eq!(emails[0].subject, "subject");
    assert_eq!(emails[0].body, vec!["body"]);
    assert_eq!(
        emails[0].headers,
        vec!["From: from@a.com", "To: to@b.com", "Subject: subject"]
    );
}

#[test]
fn test_newest_first_across_connections() {
    let (server, addr) = start_test_server();

    send_one(addr, "from@a.com", "to@b.com", "subject", "body");
    send_one(addr, "from2@a.com", "to2@b.com", "subject2", "body2");

    let emails = server.get_emails();
    assert_eq!(emails.len(), 2);
    assert_eq!(emails[0].subject, "subject2");
    assert_eq!(emails[0].from, vec!["from2@a.com"]);
    assert_eq!(emails[1].subject, "subject");
    assert_eq!(emails[1].body, vec!["body"]);
}

#[test]
fn test_multiple_emails_on_same_connection() {
    let (server, addr) = start_test_server();
    let mut client = Client::connect(addr);
    client.send_command("HELO client.local");

    let first = message("from@a.com", "to@b.com", "subject", "body");
    let second = message("from2@a.com", "to2@b.com", "subject2", "body2");
    assert!(client
        .send_mail("from@a.com", &["to@b.com"], &first)
        .starts_with("250"));
    assert!(client
        .send_mail("from2@a.com", &["to2@b.com"], &second)
        .starts_with("250"));
    client.send_command("QUIT");

    let emails = server.get_emails();
    assert_eq!(emails.len(), 2);
    assert_eq!(emails[0].subject, "subject2");
    assert_eq!(emails[0].to, vec!["to2@b.com"]);
    assert_eq!(emails[1].subject, "subject");
    assert_eq!(emails[1].to, vec!["to@b.com"]);
}

#[test]
fn test_empty_body_has_no_lines() {
    let (server, addr) = start_test_server();

    send_one(addr, "from@a.com", "to@b.com", "subject", "");

    let emails = server.get_emails();
    assert_eq!(emails.len(), 1);
    assert!(emails[0].body.is_empty());
    assert_eq!(emails[0].subject, "subject");
}

#[test]
fn test_body_does_not_overwrite_headers() {
    for field in [
        "Subject",
        "From",
        "To",
        "Body",
        "Content-Type",
        "MIME-Version",
        "Priority",
        "Date",
    ] {
        let (server, addr) = start_test_server();
        let body = format!("{field}: overwritten");

        send_one(addr, "from@a.com", "to@b.com", "subject", &body);

        let emails = server.get_emails();
        assert_eq!(emails.len(), 1, "{field}");
        assert_eq!(emails[0].subject, "subject", "{field}");
        assert_eq!(emails[0].from, vec!["from@a.com"], "{field}");
        assert_eq!(emails[0].to, vec!["to@b.com"], "{field}");
        assert_eq!(emails[0].body, vec![body], "{field}");
    }
}

#[test]
fn test_missing_subject_is_empty_string() {
    let (server, addr) = start_test_server();
    let mut client = Client::connect(addr);

    let reply = client.send_mail(
        "from@a.com",
        &["to@b.com"],
        "From: from@a.com\nTo: to@b.com\n\nno subject here",
    );
    assert!(reply.starts_with("250"));

    assert_eq!(server.get_emails()[0].subject, "");
}

#[test]
fn test_multiple_from_and_to_addresses() {
    let (server, addr) = start_test_server();
    let mut client = Client::connect(addr);

    let reply = client.send_mail(
        "one@a.com",
        &["x@b.com", "y@b.com"],
        "From: one@a.com, two@a.com\nTo: x@b.com, y@b.com\nSubject: many\n\nbody",
    );
    assert!(reply.starts_with("250"));

    let email = &server.get_emails()[0];
    assert_eq!(email.from, vec!["one@a.com", "two@a.com"]);
    assert_eq!(email.to, vec!["x@b.com", "y@b.com"]);
}

#[test]
fn test_get_emails_and_reset() {
    let (server, addr) = start_test_server();

    send_one(addr, "from@a.com", "to@b.com", "first", "body");
    send_one(addr, "from@a.com", "to@b.com", "second", "body");

    let drained = server.get_emails_and_reset();
    assert_eq!(drained.len(), 2);
    assert_eq!(drained[0].subject, "second");
    assert!(server.get_emails().is_empty());

    send_one(addr, "from@a.com", "to@b.com", "third", "body");
    let emails = server.get_emails();
    assert_eq!(emails.len(), 1);
    assert_eq!(emails[0].subject, "third");
}

#[test]
fn test_subscription_receives_each_email_once() {
    let (server, addr) = start_test_server();
    let subscription = server.subscribe();

    send_one(addr, "from@a.com", "to@b.com", "subject", "body");

    let email = subscription.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(email, server.get_emails()[0]);
    assert!(subscription.try_recv().is_err());
}

#[test]
fn test_unsubscribed_handle_receives_nothing() {
    let (server, addr) = start_test_server();
    let kept = server.subscribe();
    server.subscribe().unsubscribe();

    send_one(addr, "from@a.com", "to@b.com", "subject", "body");

    assert!(kept.recv_timeout(Duration::from_secs(1)).is_ok());
}

#[test]
fn test_mime_part_headers_are_collected() {
    let (server, addr) = start_test_server();
    let mut client = Client::connect(addr);

    let reply = client.send_mail(
        "from@a.com",
        &["to@b.com"],
        concat!(
            "From: from@a.com\n",
            "To: to@b.com\n",
            "Subject: mime\n",
            "MIME-Version: 1.0\n",
            "Content-Type: multipart/alternative; boundary=\"sep\"\n",
            "\n",
            "--sep\n",
            "Content-Type: text/plain; charset=utf-8\n",
            "Content-Transfer-Encoding: 7bit\n",
            "\n",
            "plain text\n",
            "--sep\n",
            "Content-Type: text/html; charset=utf-8\n",
            "\n",
            "<b>html</b>\n",
            "--sep--",
        ),
    );
    assert!(reply.starts_with("250"));

    let email = &server.get_emails()[0];
    assert_eq!(email.body, vec!["plain text"]);
    assert!(email
        .headers
        .contains(&"Content-Transfer-Encoding: 7bit".to_string()));
    assert!(email
        .headers
        .contains(&"Content-Type: text/html; charset=utf-8".to_string()));
}

#[test]
fn test_dot_stuffing_round_trip() {
    let (server, addr) = start_test_server();
    let mut client = Client::connect(addr);

    let reply = client.send_mail(
        "from@a.com",
        &["to@b.com"],
        "Subject: dots\n\n.\n..two\nplain",
    );
    assert!(reply.starts_with("250"));

    assert_eq!(server.get_emails()[0].body, vec![".", "..two", "plain"]);
}

#[test]
fn test_forwarding_lands_in_target_store() {
    let (target, target_addr) = start_test_server();
    let forwarder = SmtpServer::new("forwarder.local").with_forwarding(ForwardConfig::new(
        target_addr.ip().to_string(),
        target_addr.port(),
    ));
    let forwarder_addr = forwarder.spawn("127.0.0.1:0").unwrap();
    let subscription = forwarder.subscribe();

    send_one(forwarder_addr, "from@a.com", "to@b.com", "relayed", "body");

    let relayed = subscription.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(relayed.subject, "relayed");
    assert!(forwarder.get_emails().is_empty());

    let emails = target.get_emails();
    assert_eq!(emails.len(), 1);
    assert_eq!(emails[0].subject, "relayed");
    assert_eq!(emails[0].from, vec!["from@a.com"]);
    assert_eq!(emails[0].to, vec!["to@b.com"]);
    assert_eq!(emails[0].body, vec!["body"]);
}

#[test]
fn test_forwarding_failure_is_reported() {
    let closed_port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let forwarder = SmtpServer::new("forwarder.local").with_forwarding(
        ForwardConfig::new("127.0.0.1", closed_port).with_timeout(Duration::from_secs(2)),
    );
    let addr = forwarder.spawn("127.0.0.1:0").unwrap();
    let subscription = forwarder.subscribe();
    let mut client = Client::connect(addr);

    let reply = client.send_mail(
        "from@a.com",
        &["to@b.com"],
        &message("from@a.com", "to@b.com", "lost", "body"),
    );
    assert!(reply.starts_with("451"), "{reply}");
    assert!(subscription.try_recv().is_err());

    // The connection is still usable
    assert!(client.send_command("NOOP").starts_with("250"));
    assert!(client.send_command("QUIT").starts_with("221"));
}

#[test]
fn test_upstream_rejection_is_reported() {
    let closed_port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let upstream = SmtpServer::new("upstream.local").with_forwarding(
        ForwardConfig::new("127.0.0.1", closed_port).with_timeout(Duration::from_secs(2)),
    );
    let upstream_addr = upstream.spawn("127.0.0.1:0").unwrap();
    let upstream_subscription = upstream.subscribe();

    let forwarder = SmtpServer::new("forwarder.local").with_forwarding(
        ForwardConfig::new(upstream_addr.ip().to_string(), upstream_addr.port())
            .with_timeout(Duration::from_secs(5)),
    );
    let addr = forwarder.spawn("127.0.0.1:0").unwrap();
    let subscription = forwarder.subscribe();
    let mut client = Client::connect(addr);

    // The upstream server accepts the session but answers its DATA with 451
    let reply = client.send_mail(
        "from@a.com",
        &["to@b.com"],
        &message("from@a.com", "to@b.com", "rejected upstream", "body"),
    );
    assert!(reply.starts_with("451"), "{reply}");
    assert!(subscription.try_recv().is_err());
    assert!(upstream_subscription.try_recv().is_err());
    assert!(forwarder.get_emails().is_empty());
    assert!(upstream.get_emails().is_empty());

    assert!(client.send_command("NOOP").starts_with("250"));
}

#[test]
fn test_message_size_limit() {
    let (server, addr) = start_test_server();
    let mut client = Client::connect(addr);
    client.send_command("HELO client.local");
    client.send_command("MAIL FROM:<sender@example.com>");
    client.send_command("RCPT TO:<recipient@example.com>");
    assert!(client.send_command("DATA").starts_with("354"));

    let line = "z".repeat(900);
    let line_count = SmtpLimits::MAX_DATA_SIZE / (line.len() + 2) + 100;
    {
        let mut writer = std::io::BufWriter::new(&client.stream);
        write!(writer, "Subject: too big\r\n\r\n").unwrap();
        for _ in 0..line_count {
            write!(writer, "{line}\r\n").unwrap();
        }
        writer.flush().unwrap();
    }
    let reply = client.send_command(".");
    assert!(reply.starts_with("552"), "{reply}");
    assert!(server.get_emails().is_empty());

    assert!(client
        .send_command("MAIL FROM:<sender@example.com>")
        .starts_with("250"));
}

#[test]
fn test_command_line_length_limit() {
    let (_server, addr) = start_test_server();
    let mut client = Client::connect(addr);

    let long_command = "HELO ".to_string() + &"a".repeat(SmtpLimits::COMMAND_LINE_MAX_LENGTH);
    let response = client.send_command(&long_command);
    assert!(response.starts_with("500"));

    assert!(client.send_command("QUIT").starts_with("221"));
}

#[test]
fn test_domain_name_length_limit() {
    let (_server, addr) = start_test_server();
    let mut client = Client::connect(addr);

    let long_domain = "a".repeat(SmtpLimits::DOMAIN_MAX_LENGTH + 1);
    let response = client.send_command(&format!("HELO {long_domain}"));
    assert!(response.starts_with("501"));
}

#[test]
fn test_email_address_component_limits() {
    let (_server, addr) = start_test_server();
    let mut client = Client::connect(addr);
    client.send_command("HELO client.local");

    let long_user = "a".repeat(SmtpLimits::USER_MAX_LENGTH + 1);
    let response = client.send_command(&format!("MAIL FROM:<{long_user}@example.com>"));
    assert!(response.starts_with("501"));

    let long_domain = "a".repeat(SmtpLimits::DOMAIN_MAX_LENGTH + 1);
    let response = client.send_command(&format!("MAIL FROM:<user@{long_domain}>"));
    assert!(response.starts_with("501"));
}

#[test]
fn test_recipient_limit() {
    let (_server, addr) = start_test_server();
    let mut client = Client::connect(addr);
    client.send_command("HELO client.local");
    client.send_command("MAIL FROM:<sender@example.com>");

    for i in 0..SmtpLimits::MAX_RECIPIENTS {
        let response = client.send_command(&format!("RCPT TO:<user{i}@example.com>"));
        assert!(response.starts_with("250"));
    }

    let response = client.send_command("RCPT TO:<extra@example.com>");
    assert!(response.starts_with("552"));
}

#[test]
fn test_protocol_errors_keep_session_alive() {
    let (server, addr) = start_test_server();
    let mut client = Client::connect(addr);

    assert!(client.send_command("DATA").starts_with("503"));
    assert!(client.send_command("RCPT TO:<to@b.com>").starts_with("503"));
    assert!(client.send_command("BOGUS").starts_with("500"));

    let reply = client.send_mail(
        "from@a.com",
        &["to@b.com"],
        &message("from@a.com", "to@b.com", "after errors", "body"),
    );
    assert!(reply.starts_with("250"));
    assert_eq!(server.get_emails()[0].subject, "after errors");
}

#[test]
fn test_non_utf8_input_handling() {
    let (_server, addr) = start_test_server();
    let mut client = Client::connect(addr);

    client.stream.write_all(&[0xFF, 0xFE, 0xFD]).unwrap();
    let response = client.send_command(" HELO client.local");
    assert!(response.starts_with("500"));

    assert!(client.send_command("HELO client.local").starts_with("250"));
}

#[test]
fn test_aborted_connection_does_not_affect_others() {
    let (server, addr) = start_test_server();

    {
        let mut dropped = Client::connect(addr);
        dropped.send_command("MAIL FROM:<from@a.com>");
        dropped.send_command("RCPT TO:<to@b.com>");
        dropped.send_command("DATA");
        write!(dropped.stream, "Subject: never finished\r\n").unwrap();
    }

    send_one(addr, "from@a.com", "to@b.com", "finished", "body");

    let emails = server.get_emails();
    assert_eq!(emails.len(), 1);
    assert_eq!(emails[0].subject, "finished");
}

#[test]
fn test_concurrent_connections() {
    let (server, addr) = start_test_server();
    let subscription = server.subscribe();

    // Open every connection first so the transactions overlap
    let mut clients: Vec<Client> = (0..5).map(|_| Client::connect(addr)).collect();
    for (client_id, client) in clients.iter_mut().enumerate() {
        client.send_command(&format!("HELO client{client_id}.local"));
        client.send_command(&format!("MAIL FROM:<sender{client_id}@example.com>"));
        client.send_command(&format!("RCPT TO:<recipient{client_id}@example.com>"));
    }

    let handles: Vec<_> = clients
        .into_iter()
        .enumerate()
        .map(|(client_id, mut client)| {
            thread::spawn(move || {
                assert!(client.send_command("DATA").starts_with("354"));
                let body = message(
                    &format!("sender{client_id}@example.com"),
                    &format!("recipient{client_id}@example.com"),
                    &format!("Concurrent Test {client_id}"),
                    &format!("This is from client {client_id}"),
                );
                for line in body.split('\n') {
                    write!(client.stream, "{line}\r\n").unwrap();
                }
                assert!(client.send_command(".").starts_with("250"));
                client.send_command("QUIT");
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let notified = subscription.wait_for(5, Duration::from_secs(2));
    assert_eq!(notified.len(), 5);

    let emails = server.get_emails();
    assert_eq!(emails.len(), 5);
    let mut subjects: Vec<_> = emails.iter().map(|e| e.subject.clone()).collect();
    subjects.sort();
    subjects.dedup();
    assert_eq!(subjects.len(), 5);
}
