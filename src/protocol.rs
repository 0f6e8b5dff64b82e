// MIT License - Copyright (c) 2017 Doug Rathbone
// Rust translation of cgateweb.js protocol handling

use std::fmt;

/// A C-Bus group address: `(network, application, group)`.
///
/// Components are kept as the short decimal strings C-Gate uses on the wire;
/// the bridge never does arithmetic on them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    pub network: String,
    pub application: String,
    pub group: String,
}

impl Address {
    pub fn new(
        network: impl Into<String>,
        application: impl Into<String>,
        group: impl Into<String>,
    ) -> Self {
        Self {
            network: network.into(),
            application: application.into(),
            group: group.into(),
        }
    }

    /// Parse the MQTT form `<network>/<application>/<group>`.
    pub fn parse(path: &str) -> Option<Self> {
        let mut parts = path.split('/');
        let network = parts.next()?;
        let application = parts.next()?;
        let group = parts.next()?;
        if parts.next().is_some() {
            return None;
        }
        if [network, application, group]
            .iter()
            .any(|p| p.is_empty() || !p.bytes().all(|b| b.is_ascii_digit()))
        {
            return None;
        }
        Some(Self::new(network, application, group))
    }

    /// The C-Gate object path `//<project>/<network>/<application>/<group>`.
    pub fn cgate_path(&self, project: &str) -> String {
        format!("//{}/{}/{}/{}", project, self.network, self.application, self.group)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.network, self.application, self.group)
    }
}

/// Scale a 0-100 percentage to the 0-255 wire level.
pub fn percent_to_level(percent: u8) -> u8 {
    let pct = percent.min(100);
    (f64::from(pct) * 255.0 / 100.0).round() as u8
}

/// Scale a 0-255 wire level to a 0-100 percentage.
pub fn level_to_percent(level: u8) -> u8 {
    (f64::from(level) * 100.0 / 255.0).round() as u8
}

/// Commands the bridge writes to the C-Gate command channel.
///
/// `to_wire_string` yields the line without its trailing newline; the
/// connection layer appends it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CgateCommand {
    /// EVENT ON — enable event echo on a command connection
    EventOn,
    /// LOGIN <user> <password>
    Login { user: String, password: String },
    /// GET //<project>/<n>/<a>/<g> level
    GetLevel { project: String, address: Address },
    /// GET //<project>/<n>/<a>/* level
    GetAllLevels { project: String, network: String, application: String },
    /// ON //<project>/<n>/<a>/<g>
    On { project: String, address: Address },
    /// OFF //<project>/<n>/<a>/<g>
    Off { project: String, address: Address },
    /// RAMP //<project>/<n>/<a>/<g> <level> [<ramp time>]
    Ramp { project: String, address: Address, level: u8, ramp_time: Option<String> },
    /// TREEXML <network>
    TreeXml { network: String },
    /// A `#` comment line, ignored by C-Gate (keep-alive / health probe)
    Comment { text: String },
}

impl CgateCommand {
    pub fn to_wire_string(&self) -> String {
        match self {
            CgateCommand::EventOn => "EVENT ON".to_string(),
            CgateCommand::Login { user, password } => format!("LOGIN {user} {password}"),
            CgateCommand::GetLevel { project, address } => {
                format!("GET {} level", address.cgate_path(project))
            }
            CgateCommand::GetAllLevels { project, network, application } => {
                format!("GET //{project}/{network}/{application}/* level")
            }
            CgateCommand::On { project, address } => {
                format!("ON {}", address.cgate_path(project))
            }
            CgateCommand::Off { project, address } => {
                format!("OFF {}", address.cgate_path(project))
            }
            CgateCommand::Ramp { project, address, level, ramp_time } => match ramp_time {
                Some(time) => format!("RAMP {} {level} {time}", address.cgate_path(project)),
                None => format!("RAMP {} {level}", address.cgate_path(project)),
            },
            CgateCommand::TreeXml { network } => format!("TREEXML {network}"),
            CgateCommand::Comment { text } => format!("# {text}"),
        }
    }
}

/// One parsed C-Bus event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CbusEvent {
    pub device_type: String,
    pub action: String,
    pub address: Address,
    pub level: Option<u8>,
}

impl CbusEvent {
    /// Parse a standard event-channel line:
    /// `<devType> <action> [//<project>/]<n>/<a>/<g> [<level>]`.
    ///
    /// Unknown trailing tokens are ignored. Returns `None` for anything that
    /// does not match (the C-Gate banner, comments, partial lines); callers
    /// log and drop those.
    pub fn parse(line: &str) -> Option<Self> {
        let mut tokens = line.split_whitespace();
        let device_type = tokens.next()?;
        let action = tokens.next()?;
        let path = tokens.next()?;
        if !is_word(device_type) || !is_word(action) {
            return None;
        }

        let address = Self::parse_path(path)?;
        let level = match tokens.next() {
            Some(token) if token.bytes().all(|b| b.is_ascii_digit()) => {
                Some(token.parse::<u8>().ok()?)
            }
            _ => None,
        };

        Some(Self {
            device_type: device_type.to_string(),
            action: action.to_string(),
            address,
            level,
        })
    }

    /// Parse the payload of a `300` object-status response:
    /// `//<project>/<n>/<a>/<g>: level=<L>`.
    pub fn parse_status(payload: &str) -> Option<Self> {
        let payload = payload.trim();
        let (path, rest) = payload.split_once(':')?;
        let address = Self::parse_path(path.trim())?;

        let level_str = rest.trim().strip_prefix("level=")?;
        let level: u8 = level_str.trim().parse().ok()?;

        Some(Self {
            device_type: "lighting".to_string(),
            action: if level > 0 { "on" } else { "off" }.to_string(),
            address,
            level: Some(level),
        })
    }

    /// The level this event implies: an explicit level if present, else 255
    /// for `on` and 0 for everything else.
    pub fn effective_level(&self) -> u8 {
        match self.level {
            Some(level) => level,
            None if self.action == "on" => 255,
            None => 0,
        }
    }

    fn parse_path(path: &str) -> Option<Address> {
        // An optional //<project>/ prefix precedes the numeric triple.
        let numeric = match path.strip_prefix("//") {
            Some(rest) => {
                let (project, numeric) = rest.split_once('/')?;
                if project.is_empty() {
                    return None;
                }
                numeric
            }
            None => path,
        };
        Address::parse(numeric)
    }
}

fn is_word(token: &str) -> bool {
    !token.is_empty()
        && token.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_parse() {
        let addr = Address::parse("254/56/4").unwrap();
        assert_eq!(addr, Address::new("254", "56", "4"));
        assert_eq!(addr.to_string(), "254/56/4");
        assert_eq!(addr.cgate_path("HOME"), "//HOME/254/56/4");

        assert!(Address::parse("254/56").is_none());
        assert!(Address::parse("254/56/4/9").is_none());
        assert!(Address::parse("254//4").is_none());
        assert!(Address::parse("254/56/abc").is_none());
    }

    #[test]
    fn test_level_scaling() {
        assert_eq!(percent_to_level(0), 0);
        assert_eq!(percent_to_level(50), 128);
        assert_eq!(percent_to_level(100), 255);
        assert_eq!(level_to_percent(0), 0);
        assert_eq!(level_to_percent(128), 50);
        assert_eq!(level_to_percent(255), 100);
        // Round trip: every percentage survives the 0-255 trip.
        for pct in 0..=100u8 {
            assert_eq!(level_to_percent(percent_to_level(pct)), pct);
        }
    }

    #[test]
    fn test_command_wire_strings() {
        let addr = Address::new("254", "56", "4");
        assert_eq!(CgateCommand::EventOn.to_wire_string(), "EVENT ON");
        assert_eq!(
            CgateCommand::Login { user: "admin".into(), password: "pw".into() }.to_wire_string(),
            "LOGIN admin pw"
        );
        assert_eq!(
            CgateCommand::GetLevel { project: "HOME".into(), address: addr.clone() }
                .to_wire_string(),
            "GET //HOME/254/56/4 level"
        );
        assert_eq!(
            CgateCommand::GetAllLevels {
                project: "HOME".into(),
                network: "254".into(),
                application: "56".into()
            }
            .to_wire_string(),
            "GET //HOME/254/56/* level"
        );
        assert_eq!(
            CgateCommand::On { project: "HOME".into(), address: addr.clone() }.to_wire_string(),
            "ON //HOME/254/56/4"
        );
        assert_eq!(
            CgateCommand::Off { project: "HOME".into(), address: addr.clone() }.to_wire_string(),
            "OFF //HOME/254/56/4"
        );
        assert_eq!(
            CgateCommand::Ramp {
                project: "HOME".into(),
                address: addr.clone(),
                level: 128,
                ramp_time: Some("2s".into())
            }
            .to_wire_string(),
            "RAMP //HOME/254/56/4 128 2s"
        );
        assert_eq!(
            CgateCommand::Ramp {
                project: "HOME".into(),
                address: addr,
                level: 154,
                ramp_time: None
            }
            .to_wire_string(),
            "RAMP //HOME/254/56/4 154"
        );
        assert_eq!(
            CgateCommand::TreeXml { network: "254".into() }.to_wire_string(),
            "TREEXML 254"
        );
        assert_eq!(
            CgateCommand::Comment { text: "keep-alive 12345".into() }.to_wire_string(),
            "# keep-alive 12345"
        );
    }

    #[test]
    fn test_event_parse_standard() {
        let event = CbusEvent::parse("lighting on 254/56/4").unwrap();
        assert_eq!(event.device_type, "lighting");
        assert_eq!(event.action, "on");
        assert_eq!(event.address, Address::new("254", "56", "4"));
        assert_eq!(event.level, None);
        assert_eq!(event.effective_level(), 255);

        let event = CbusEvent::parse("lighting ramp 254/56/4 128").unwrap();
        assert_eq!(event.action, "ramp");
        assert_eq!(event.level, Some(128));

        let event = CbusEvent::parse("lighting off //HOME/254/56/4").unwrap();
        assert_eq!(event.address, Address::new("254", "56", "4"));
        assert_eq!(event.effective_level(), 0);
    }

    #[test]
    fn test_event_parse_trailing_tokens_ignored() {
        let event = CbusEvent::parse("lighting on 254/56/4 #sourceunit=12 OID=abc").unwrap();
        assert_eq!(event.level, None);
        let event = CbusEvent::parse("lighting ramp 254/56/4 200 #sourceunit=12").unwrap();
        assert_eq!(event.level, Some(200));
    }

    #[test]
    fn test_event_parse_rejects_noise() {
        // C-Gate banner and other non-event lines.
        assert!(CbusEvent::parse("201 Service ready: Clipsal C-Gate Version: v2.11.2").is_none());
        assert!(CbusEvent::parse("lighting on").is_none());
        assert!(CbusEvent::parse("lighting on 254/56").is_none());
        assert!(CbusEvent::parse("lighting on 254/56/199 255").is_some());
        assert!(CbusEvent::parse("lighting ramp 254/56/4 300").is_none(), "level above 255");
        assert!(CbusEvent::parse("").is_none());
    }

    #[test]
    fn test_status_parse() {
        let event = CbusEvent::parse_status("//HOME/254/56/4: level=128").unwrap();
        assert_eq!(event.device_type, "lighting");
        assert_eq!(event.action, "on");
        assert_eq!(event.address, Address::new("254", "56", "4"));
        assert_eq!(event.level, Some(128));

        let event = CbusEvent::parse_status("//HOME/254/56/4: level=0").unwrap();
        assert_eq!(event.action, "off");

        assert!(CbusEvent::parse_status("//HOME/254/56/4: ramps=0").is_none());
        assert!(CbusEvent::parse_status("254/56/4 level=128").is_none());
    }
}
