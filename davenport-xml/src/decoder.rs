use quick_xml::events::Event;

use super::element::Element;
use super::error::ParsingError;
use super::types::*;
use super::values::PropertyRegistry;
use super::xml::{IRead, QName, QRead, Reader, DAV_URN};

/// PROPFIND request
///
/// Exactly one of propname, allprop or prop decides the shape; a client
/// sending anything else next to them (a vendor extension, whitespace)
/// gets it ignored, and a propfind carrying none of the three is
/// malformed.
impl QRead<PropFind> for PropFind {
    async fn qread(xml: &mut Reader<impl IRead>) -> Result<Self, ParsingError> {
        xml.open(DAV_URN, "propfind").await?;

        let parsed = loop {
            if xml.maybe_open(DAV_URN, "propname").await? {
                xml.close().await?;
                break PropFind::PropName;
            }
            if xml.maybe_open(DAV_URN, "prop").await? {
                let names = collect_names(xml).await?;
                xml.close().await?;
                break PropFind::Prop(names);
            }
            if xml.maybe_open(DAV_URN, "allprop").await? {
                xml.close().await?;
                // the optional include block can sit behind whitespace
                while !matches!(
                    xml.peek(),
                    Event::Start(_) | Event::Empty(_) | Event::End(_) | Event::Eof
                ) {
                    xml.skip().await?;
                }
                let mut include = vec![];
                if xml.maybe_open(DAV_URN, "include").await? {
                    include = collect_names(xml).await?;
                    xml.close().await?;
                }
                break PropFind::AllProp(include);
            }
            if !xml.has_content() || matches!(xml.peek(), Event::End(_)) {
                return Err(ParsingError::MissingChild);
            }
            xml.skip().await?;
        };

        xml.close().await?;
        Ok(parsed)
    }
}

/// The expanded names of every child element at the current level, their
/// content dropped.
async fn collect_names(xml: &mut Reader<impl IRead>) -> Result<Vec<QName>, ParsingError> {
    let mut names = vec![];
    while xml.has_content() {
        match xml.peek() {
            Event::Start(_) | Event::Empty(_) => {
                if let Some(name) = xml.peek_qname() {
                    names.push(name);
                }
                xml.skip().await?;
            }
            Event::End(_) => break,
            Event::Eof => return Err(ParsingError::Eof),
            _ => xml.skip().await?,
        }
    }
    Ok(names)
}

/// PROPPATCH request
///
/// Set and remove blocks flatten into one list; the document order of the
/// property elements is kept because failures must cascade in order.
impl PropertyUpdate {
    pub fn from_element(
        root: &Element,
        registry: &PropertyRegistry,
    ) -> Result<Self, ParsingError> {
        if !root.name.is_dav("propertyupdate") {
            return Err(ParsingError::TagNotFound);
        }

        let mut ops = vec![];
        for block in &root.children {
            if block.name.is_dav("set") {
                for prop in block.children.iter().filter(|c| c.name.is_dav("prop")) {
                    for value_el in &prop.children {
                        ops.push(PropPatch {
                            name: value_el.name.clone(),
                            value: Some(registry.parse(value_el)?),
                        });
                    }
                }
            } else if block.name.is_dav("remove") {
                for prop in block.children.iter().filter(|c| c.name.is_dav("prop")) {
                    for value_el in &prop.children {
                        ops.push(PropPatch {
                            name: value_el.name.clone(),
                            value: None,
                        });
                    }
                }
            }
        }
        Ok(PropertyUpdate(ops))
    }
}

/// Extended MKCOL request (RFC 5689)
///
/// The body must carry a `{DAV:}set` block whose properties include
/// `{DAV:}resourcetype`; the resource type element names are pulled out
/// and the remaining properties come back as initial dead properties.
impl Mkcol {
    pub fn from_element(
        root: &Element,
        registry: &PropertyRegistry,
    ) -> Result<Self, ParsingError> {
        if !root.name.is_dav("mkcol") {
            return Err(ParsingError::TagNotFound);
        }

        let set = root.dav_child("set").ok_or(ParsingError::MissingChild)?;
        let prop = set.dav_child("prop").ok_or(ParsingError::MissingChild)?;

        let mut resource_types = None;
        let mut properties = vec![];
        for value_el in &prop.children {
            if value_el.name.is_dav("resourcetype") {
                resource_types = Some(value_el.child_names());
            } else {
                properties.push((value_el.name.clone(), registry.parse(value_el)?));
            }
        }

        match resource_types {
            Some(resource_types) => Ok(Mkcol {
                resource_types,
                properties,
            }),
            None => Err(ParsingError::MissingChild),
        }
    }
}

impl Report {
    pub fn from_element(root: Element) -> Self {
        Self { root }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::values::PropValue;
    use quick_xml::reader::NsReader;

    async fn dom(src: &str) -> Element {
        let mut rdr = Reader::new(NsReader::from_reader(src.as_bytes()))
            .await
            .unwrap();
        rdr.find::<Element>().await.unwrap()
    }

    #[tokio::test]
    async fn basic_propfind_propname() {
        let src = r#"<?xml version="1.0" encoding="utf-8" ?>
<rando/>
<garbage><old/></garbage>
<D:propfind xmlns:D="DAV:">
    <D:propname/>
</D:propfind>
"#;

        let mut rdr = Reader::new(NsReader::from_reader(src.as_bytes()))
            .await
            .unwrap();
        let got = rdr.find::<PropFind>().await.unwrap();

        assert_eq!(got, PropFind::PropName);
    }

    #[tokio::test]
    async fn basic_propfind_prop() {
        let src = r#"<?xml version="1.0" encoding="utf-8" ?>
<D:propfind xmlns:D="DAV:" xmlns:R="http://ns.example.com/boxschema/">
    <D:prop>
        <D:displayname/>
        <D:getcontentlength/>
        <D:getetag/>
        <R:bigbox/>
    </D:prop>
</D:propfind>
"#;

        let mut rdr = Reader::new(NsReader::from_reader(src.as_bytes()))
            .await
            .unwrap();
        let got = rdr.find::<PropFind>().await.unwrap();

        assert_eq!(
            got,
            PropFind::Prop(vec![
                QName::dav("displayname"),
                QName::dav("getcontentlength"),
                QName::dav("getetag"),
                QName::new("http://ns.example.com/boxschema/", "bigbox"),
            ])
        );
    }

    #[tokio::test]
    async fn propfind_allprop_include() {
        let src = r#"<?xml version="1.0" encoding="utf-8" ?>
<D:propfind xmlns:D="DAV:">
    <D:allprop/>
    <D:include>
        <D:supported-report-set/>
    </D:include>
</D:propfind>
"#;

        let mut rdr = Reader::new(NsReader::from_reader(src.as_bytes()))
            .await
            .unwrap();
        let got = rdr.find::<PropFind>().await.unwrap();

        assert_eq!(
            got,
            PropFind::AllProp(vec![QName::dav("supported-report-set")])
        );
    }

    #[tokio::test]
    async fn rfc_propertyupdate() {
        let src = r#"<?xml version="1.0" encoding="utf-8" ?>
     <D:propertyupdate xmlns:D="DAV:"
             xmlns:Z="http://ns.example.com/standards/z39.50/">
       <D:set>
         <D:prop>
           <Z:Authors>
             <Z:Author>Jim Whitehead</Z:Author>
             <Z:Author>Roy Fielding</Z:Author>
           </Z:Authors>
         </D:prop>
       </D:set>
       <D:remove>
         <D:prop><Z:Copyright-Owner/></D:prop>
       </D:remove>
     </D:propertyupdate>"#;

        let registry = PropertyRegistry::default();
        let root = dom(src).await;
        let got = PropertyUpdate::from_element(&root, &registry).unwrap();

        let z = "http://ns.example.com/standards/z39.50/";
        assert_eq!(got.0.len(), 2);
        assert_eq!(got.0[0].name, QName::new(z, "Authors"));
        assert!(matches!(got.0[0].value, Some(PropValue::Xml(_))));
        assert_eq!(got.0[1].name, QName::new(z, "Copyright-Owner"));
        assert_eq!(got.0[1].value, None);
    }

    #[tokio::test]
    async fn rfc_extended_mkcol() {
        let src = r#"<?xml version="1.0" encoding="utf-8" ?>
   <D:mkcol xmlns:D="DAV:" xmlns:E="http://example.com/ns/">
     <D:set>
       <D:prop>
         <D:resourcetype>
           <D:collection/>
           <E:special-resource/>
         </D:resourcetype>
         <D:displayname>Special Resource</D:displayname>
       </D:prop>
     </D:set>
   </D:mkcol>"#;

        let registry = PropertyRegistry::default();
        let root = dom(src).await;
        let got = Mkcol::from_element(&root, &registry).unwrap();

        assert_eq!(
            got.resource_types,
            vec![
                QName::dav("collection"),
                QName::new("http://example.com/ns/", "special-resource"),
            ]
        );
        assert_eq!(
            got.properties,
            vec![(
                QName::dav("displayname"),
                PropValue::Text("Special Resource".into())
            )]
        );
    }

    #[tokio::test]
    async fn mkcol_without_resourcetype_is_rejected() {
        let src = r#"<?xml version="1.0" encoding="utf-8" ?>
   <D:mkcol xmlns:D="DAV:">
     <D:set>
       <D:prop><D:displayname>nope</D:displayname></D:prop>
     </D:set>
   </D:mkcol>"#;

        let registry = PropertyRegistry::default();
        let root = dom(src).await;
        assert!(matches!(
            Mkcol::from_element(&root, &registry),
            Err(ParsingError::MissingChild)
        ));
    }

    #[tokio::test]
    async fn report_root_identifies_report() {
        let src = r#"<?xml version="1.0" encoding="utf-8" ?>
<C:calendar-multiget xmlns:D="DAV:" xmlns:C="urn:ietf:params:xml:ns:caldav">
    <D:prop><D:getetag/></D:prop>
    <D:href>/calendars/a.ics</D:href>
</C:calendar-multiget>"#;

        let root = dom(src).await;
        let report = Report::from_element(root);
        assert_eq!(
            report.name(),
            &QName::new("urn:ietf:params:xml:ns:caldav", "calendar-multiget")
        );
        assert_eq!(report.root.children.len(), 2);
    }

    #[tokio::test]
    async fn dom_resolves_prefixes_and_attributes() {
        let src = r#"<?xml version="1.0" encoding="utf-8" ?>
<x:outer xmlns:x="urn:example" id="42">
    inner text
    <x:child/>
</x:outer>"#;

        let root = dom(src).await;
        assert_eq!(root.name, QName::new("urn:example", "outer"));
        assert_eq!(root.attributes, vec![("id".to_string(), "42".to_string())]);
        assert_eq!(root.children.len(), 1);
        assert_eq!(root.children[0].name, QName::new("urn:example", "child"));
        assert_eq!(root.text.trim(), "inner text");
    }
}
