use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread;

use serde_json::Value;


#[derive(Debug, Clone)]
pub struct Request {
	pub method: String,
	pub path: String,
	pub headers: Vec<(String,String)>,
	pub body: Value
}

impl Request {

	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers.iter()
			.find(|(n, _)| n.eq_ignore_ascii_case(name))
			.map(|(_, v)| v.as_str())
	}
}


/// A tiny HTTP endpoint that answers every request with a fixed status and remembers what it got.
pub struct Capture {
	port: u16,
	requests: Arc<Mutex<Vec<Request>>>
}

impl Capture {

	pub fn start(status: u16) -> Self {

		let listener = TcpListener::bind("127.0.0.1:0")
			.expect("Failed to bind capture server");
		let port = listener.local_addr()
			.expect("Failed to get capture address")
			.port();
		let requests = Arc::new(Mutex::new(Vec::new()));

		thread::spawn({
			let requests = requests.clone();
			move || {
				for stream in listener.incoming() {
					let Ok(mut stream) = stream
						else { continue; };
					let request = read_request(&mut BufReader::new(&stream));
					requests.lock().unwrap().push(request);
					let response = format!("HTTP/1.1 {} Whatever\r\nContent-Length: 0\r\nConnection: close\r\n\r\n", status);
					let _ = stream.write_all(response.as_bytes());
				}
			}
		});

		Self {
			port,
			requests
		}
	}

	pub fn url(&self) -> String {
		format!("http://127.0.0.1:{}/callback", self.port)
	}

	pub fn requests(&self) -> Vec<Request> {
		self.requests.lock().unwrap().clone()
	}
}


fn read_request(reader: &mut impl BufRead) -> Request {

	let mut line = String::new();
	reader.read_line(&mut line).unwrap();
	let mut parts = line.split_whitespace();
	let method = parts.next().unwrap_or_default().to_string();
	let path = parts.next().unwrap_or_default().to_string();

	let mut headers = Vec::new();
	loop {
		let mut line = String::new();
		reader.read_line(&mut line).unwrap();
		let line = line.trim_end();
		if line.is_empty() {
			break;
		}
		if let Some((name, value)) = line.split_once(':') {
			headers.push((name.trim().to_string(), value.trim().to_string()));
		}
	}

	let len = headers.iter()
		.find(|(n, _)| n.eq_ignore_ascii_case("content-length"))
		.and_then(|(_, v)| v.parse::<usize>().ok())
		.unwrap_or(0);
	let mut body = vec![0u8; len];
	reader.read_exact(&mut body).unwrap();

	Request {
		method,
		path,
		headers,
		body: serde_json::from_slice(&body).unwrap_or(Value::Null)
	}
}
