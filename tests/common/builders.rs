//! Test data builders for creating test objects

use mapscope::{Atom, ContainerId, Device, Direction, Endpoint, HostContext};

/// Builder for endpoint argument lists
pub struct EndpointBuilder {
    name: String,
    direction: Direction,
    type_symbol: String,
    length: Option<i64>,
    container: ContainerId,
    properties: Vec<Atom>,
}

impl EndpointBuilder {
    pub fn output(name: &str) -> Self {
        Self::new(name, Direction::Out)
    }

    pub fn input(name: &str) -> Self {
        Self::new(name, Direction::In)
    }

    fn new(name: &str, direction: Direction) -> Self {
        Self {
            name: name.to_string(),
            direction,
            type_symbol: "f".to_string(),
            length: None,
            container: ContainerId::ROOT,
            properties: Vec::new(),
        }
    }

    pub fn int(mut self) -> Self {
        self.type_symbol = "i".to_string();
        self
    }

    pub fn length(mut self, length: i64) -> Self {
        self.length = Some(length);
        self
    }

    pub fn container(mut self, container: ContainerId) -> Self {
        self.container = container;
        self
    }

    /// Append `@key value...`
    pub fn property(mut self, key: &str, values: impl IntoIterator<Item = Atom>) -> Self {
        self.properties.push(Atom::symbol(format!("@{}", key)));
        self.properties.extend(values);
        self
    }

    pub fn instance(self, id: i64) -> Self {
        self.property("instance", [Atom::Int(id)])
    }

    pub fn args(&self) -> Vec<Atom> {
        let mut args = vec![
            Atom::symbol(self.name.clone()),
            Atom::symbol(self.type_symbol.clone()),
        ];
        if let Some(length) = self.length {
            args.push(Atom::Int(length));
        }
        args.extend(self.properties.iter().cloned());
        args
    }

    pub fn build(self, ctx: &HostContext) -> Endpoint {
        Endpoint::new(ctx, self.container, self.direction, &self.args()).unwrap()
    }
}

/// Create a device named `name` in `container`
pub fn device(ctx: &HostContext, container: ContainerId, name: &str) -> Device {
    Device::new(ctx, container, &[Atom::symbol(name)]).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_builder_args() {
        let args = EndpointBuilder::output("pos").int().length(2).instance(3).args();
        assert_eq!(
            args,
            vec![
                Atom::symbol("pos"),
                Atom::symbol("i"),
                Atom::Int(2),
                Atom::symbol("@instance"),
                Atom::Int(3),
            ]
        );
    }
}
